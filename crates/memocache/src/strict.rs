//! Serializer adapter used for fingerprinting
//!
//! Wraps any serializer and forwards everything except the values a JSON
//! encoding would collapse: non-finite floats are rejected, and `Some(v)` is
//! written as a one-field variant so it never encodes like `None`.

use serde::ser::{self, Serialize, Serializer};

/// Serialize `T` through [`StrictSerializer`]
pub(crate) struct Strict<'a, T: ?Sized>(pub(crate) &'a T);

impl<T: Serialize + ?Sized> Serialize for Strict<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(StrictSerializer(serializer))
    }
}

struct StrictSerializer<S>(S);

/// Compound state of the wrapped serializer, re-wrapping each element
struct Compound<C>(C);

fn finite<E: ser::Error>(v: f64) -> Result<(), E> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(E::custom(format!("non-finite float {v} has no canonical encoding")))
    }
}

macro_rules! forward {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, v: $ty) -> Result<S::Ok, S::Error> {
                self.0.$method(v)
            }
        )*
    };
}

impl<S: Serializer> Serializer for StrictSerializer<S> {
    type Ok = S::Ok;
    type Error = S::Error;
    type SerializeSeq = Compound<S::SerializeSeq>;
    type SerializeTuple = Compound<S::SerializeTuple>;
    type SerializeTupleStruct = Compound<S::SerializeTupleStruct>;
    type SerializeTupleVariant = Compound<S::SerializeTupleVariant>;
    type SerializeMap = Compound<S::SerializeMap>;
    type SerializeStruct = Compound<S::SerializeStruct>;
    type SerializeStructVariant = Compound<S::SerializeStructVariant>;

    forward!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
    );

    fn serialize_f32(self, v: f32) -> Result<S::Ok, S::Error> {
        finite::<S::Error>(f64::from(v))?;
        self.0.serialize_f32(v)
    }

    fn serialize_f64(self, v: f64) -> Result<S::Ok, S::Error> {
        finite::<S::Error>(v)?;
        self.0.serialize_f64(v)
    }

    fn serialize_none(self) -> Result<S::Ok, S::Error> {
        self.0.serialize_none()
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<S::Ok, S::Error> {
        self.0
            .serialize_newtype_variant("Option", 1, "Some", &Strict(value))
    }

    fn serialize_unit(self) -> Result<S::Ok, S::Error> {
        self.0.serialize_unit()
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<S::Ok, S::Error> {
        self.0.serialize_unit_struct(name)
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
    ) -> Result<S::Ok, S::Error> {
        self.0.serialize_unit_variant(name, index, variant)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<S::Ok, S::Error> {
        self.0.serialize_newtype_struct(name, &Strict(value))
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<S::Ok, S::Error> {
        self.0
            .serialize_newtype_variant(name, index, variant, &Strict(value))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, S::Error> {
        self.0.serialize_seq(len).map(Compound)
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, S::Error> {
        self.0.serialize_tuple(len).map(Compound)
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, S::Error> {
        self.0.serialize_tuple_struct(name, len).map(Compound)
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, S::Error> {
        self.0
            .serialize_tuple_variant(name, index, variant, len)
            .map(Compound)
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap, S::Error> {
        self.0.serialize_map(len).map(Compound)
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, S::Error> {
        self.0.serialize_struct(name, len).map(Compound)
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, S::Error> {
        self.0
            .serialize_struct_variant(name, index, variant, len)
            .map(Compound)
    }

    fn is_human_readable(&self) -> bool {
        self.0.is_human_readable()
    }
}

impl<C: ser::SerializeSeq> ser::SerializeSeq for Compound<C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), C::Error> {
        ser::SerializeSeq::serialize_element(&mut self.0, &Strict(value))
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        ser::SerializeSeq::end(self.0)
    }
}

impl<C: ser::SerializeTuple> ser::SerializeTuple for Compound<C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), C::Error> {
        ser::SerializeTuple::serialize_element(&mut self.0, &Strict(value))
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        ser::SerializeTuple::end(self.0)
    }
}

impl<C: ser::SerializeTupleStruct> ser::SerializeTupleStruct for Compound<C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), C::Error> {
        ser::SerializeTupleStruct::serialize_field(&mut self.0, &Strict(value))
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        ser::SerializeTupleStruct::end(self.0)
    }
}

impl<C: ser::SerializeTupleVariant> ser::SerializeTupleVariant for Compound<C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), C::Error> {
        ser::SerializeTupleVariant::serialize_field(&mut self.0, &Strict(value))
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        ser::SerializeTupleVariant::end(self.0)
    }
}

impl<C: ser::SerializeMap> ser::SerializeMap for Compound<C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), C::Error> {
        ser::SerializeMap::serialize_key(&mut self.0, &Strict(key))
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), C::Error> {
        ser::SerializeMap::serialize_value(&mut self.0, &Strict(value))
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        ser::SerializeMap::end(self.0)
    }
}

impl<C: ser::SerializeStruct> ser::SerializeStruct for Compound<C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), C::Error> {
        ser::SerializeStruct::serialize_field(&mut self.0, key, &Strict(value))
    }

    fn skip_field(&mut self, key: &'static str) -> Result<(), C::Error> {
        ser::SerializeStruct::skip_field(&mut self.0, key)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        ser::SerializeStruct::end(self.0)
    }
}

impl<C: ser::SerializeStructVariant> ser::SerializeStructVariant for Compound<C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), C::Error> {
        ser::SerializeStructVariant::serialize_field(&mut self.0, key, &Strict(value))
    }

    fn skip_field(&mut self, key: &'static str) -> Result<(), C::Error> {
        ser::SerializeStructVariant::skip_field(&mut self.0, key)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        ser::SerializeStructVariant::end(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(Strict(value))
    }

    #[test]
    fn test_plain_values_unchanged() {
        assert_eq!(encode(&(1, "a", 2.5)).unwrap(), json!([1, "a", 2.5]));
        assert_eq!(encode(&None::<u8>).unwrap(), json!(null));
    }

    #[test]
    fn test_some_is_tagged() {
        assert_eq!(encode(&Some(3)).unwrap(), json!({"Some": 3}));
        assert_eq!(encode(&Some(None::<u8>)).unwrap(), json!({"Some": null}));
        assert_ne!(
            encode(&Some(None::<u8>)).unwrap(),
            encode(&None::<Option<u8>>).unwrap()
        );
    }

    #[test]
    fn test_non_finite_rejected_when_nested() {
        assert!(encode(&f64::NAN).is_err());
        assert!(encode(&vec![1.0, f64::INFINITY]).is_err());
        assert!(encode(&Some(f32::NEG_INFINITY)).is_err());
    }
}
