//! Cached function adapter
//!
//! ```no_run
//! use memocache::{with_cache, CacheConfig, Dependency, MemoCache};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! let cache = Arc::new(MemoCache::open(CacheConfig::new("/tmp/memocache"))?);
//!
//! let line_count = with_cache("line_count", |path: &PathBuf| {
//!     std::fs::read_to_string(path)
//!         .map(|text| text.lines().count())
//!         .map_err(anyhow::Error::from)
//! })
//! .dependencies_from(|path: &PathBuf| vec![Dependency::file(path)])
//! .build(cache);
//!
//! let n = line_count.call(&PathBuf::from("schema.ttl"))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use memostore::{CacheKey, Dependency, MetaValue, Metadata};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{EntryOptions, MemoCache};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::global;

type Resolver<A> = Box<dyn Fn(&A) -> Vec<Dependency> + Send + Sync>;

/// Start wrapping `f` as `operation`
///
/// `f` takes its arguments as one value: a tuple for positional arguments or
/// a struct for named ones. That value is what gets fingerprinted.
pub fn with_cache<A, T, E, F>(operation: impl Into<String>, f: F) -> CachedBuilder<A, T, E, F>
where
    A: Serialize + ?Sized,
    F: Fn(&A) -> std::result::Result<T, E>,
{
    CachedBuilder {
        operation: operation.into(),
        f,
        options: EntryOptions::new(),
        resolve: None,
        _marker: PhantomData,
    }
}

/// Configuration for a [`CachedFn`]
pub struct CachedBuilder<A: ?Sized, T, E, F> {
    operation: String,
    f: F,
    options: EntryOptions,
    resolve: Option<Resolver<A>>,
    _marker: PhantomData<fn(&A) -> std::result::Result<T, E>>,
}

impl<A, T, E, F> CachedBuilder<A, T, E, F>
where
    A: Serialize + ?Sized,
    F: Fn(&A) -> std::result::Result<T, E>,
{
    /// Expire results `ttl` after they are computed
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.options = self.options.ttl(ttl);
        self
    }

    /// Dependencies shared by every call
    pub fn dependencies<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dependency>,
    {
        self.options = self.options.dependencies(dependencies);
        self
    }

    /// Dependencies derived from each call's arguments, resolved per call
    pub fn dependencies_from<R>(mut self, resolve: R) -> Self
    where
        R: Fn(&A) -> Vec<Dependency> + Send + Sync + 'static,
    {
        self.resolve = Some(Box::new(resolve));
        self
    }

    /// Extra metadata stored with every result
    pub fn metadata(mut self, name: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.options = self.options.metadata(name, value);
        self
    }

    /// Cache through `cache`
    pub fn build(self, cache: Arc<MemoCache>) -> CachedFn<A, T, E, F> {
        self.finish(Target::Instance(cache))
    }

    /// Cache through the process default, looked up on every call
    pub fn build_global(self) -> CachedFn<A, T, E, F> {
        self.finish(Target::Global)
    }

    fn finish(self, target: Target) -> CachedFn<A, T, E, F> {
        let mut metadata = Metadata::new();
        metadata.insert("function".to_string(), MetaValue::from(self.operation.as_str()));

        CachedFn {
            options: self.options.with_metadata(metadata),
            operation: self.operation,
            f: self.f,
            resolve: self.resolve,
            target,
            _marker: PhantomData,
        }
    }
}

enum Target {
    Instance(Arc<MemoCache>),
    Global,
}

/// A function whose results are cached by argument fingerprint
pub struct CachedFn<A: ?Sized, T, E, F> {
    operation: String,
    f: F,
    options: EntryOptions,
    resolve: Option<Resolver<A>>,
    target: Target,
    _marker: PhantomData<fn(&A) -> std::result::Result<T, E>>,
}

impl<A, T, E, F> CachedFn<A, T, E, F>
where
    A: Serialize + ?Sized,
    T: Serialize + DeserializeOwned,
    E: From<Error>,
    F: Fn(&A) -> std::result::Result<T, E>,
{
    /// Call through the cache
    ///
    /// A fingerprinting failure or a failure to open the default cache is
    /// converted into `E`; errors from the function itself pass through.
    pub fn call(&self, args: &A) -> std::result::Result<T, E> {
        let key = self.key_for(args)?;
        let cache = match &self.target {
            Target::Instance(cache) => Arc::clone(cache),
            Target::Global => global::instance()?,
        };

        match &self.resolve {
            Some(resolve) => {
                let options = self.options.clone().dependencies(resolve(args));
                cache.get_or_compute_with(&key, &options, || (self.f)(args))
            }
            None => cache.get_or_compute_with(&key, &self.options, || (self.f)(args)),
        }
    }

    /// Key a call with `args` is cached under
    pub fn key_for(&self, args: &A) -> Result<CacheKey> {
        fingerprint(&self.operation, args)
    }

    /// Operation name used as the key prefix
    pub fn operation(&self) -> &str {
        &self.operation
    }
}
