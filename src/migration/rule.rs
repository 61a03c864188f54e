use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::StoreResult;

type MigrationFn<S> = Box<dyn Fn(Arc<S>) -> BoxFuture<'static, StoreResult<()>> + Send + Sync>;

/// A migration that brings a store up to `version`.
pub struct MigrationRule<S> {
    pub version: u32,
    migration: MigrationFn<S>,
}

impl<S: Send + Sync + 'static> MigrationRule<S> {
    pub fn new<F, Fut>(version: u32, migration: F) -> Self
    where
        F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StoreResult<()>> + Send + 'static,
    {
        MigrationRule {
            version,
            migration: Box::new(move |store| migration(store).boxed()),
        }
    }

    pub(crate) fn run(&self, store: Arc<S>) -> BoxFuture<'static, StoreResult<()>> {
        (self.migration)(store)
    }
}

impl<S> fmt::Debug for MigrationRule<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRule")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
