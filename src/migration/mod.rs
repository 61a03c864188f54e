//! MigrationStore - gates a store until its schema migrations have run.

mod rule;
mod version;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{fail, FlowControl, Sink, SinkEvent};
use crate::store::{ListenerId, Listeners, Store};

pub use rule::MigrationRule;
pub use version::StoreVersion;

struct Ready<S> {
    store: Arc<S>,
    relay: ListenerId,
}

struct Relay<R> {
    listeners: Arc<Listeners<R>>,
}

#[async_trait]
impl<R: Record> Sink<R> for Relay<R> {
    async fn handle(&mut self, event: SinkEvent<R>, _fc: &FlowControl) {
        match event {
            SinkEvent::Put(record) => self.listeners.notify_put(&record).await,
            SinkEvent::Remove(record) => self.listeners.notify_remove(&record).await,
            SinkEvent::Error(_) | SinkEvent::Eof => {}
        }
    }
}

/// A `Store` decorator that runs pending migrations before any operation
/// reaches the delegate.
///
/// Construction write-locks a gate and spawns the migration task (a tokio
/// runtime must be running). The task reads the stored `StoreVersion`
/// (missing counts as 0), runs every rule with
/// `stored < version <= app_version` in ascending order, and persists the
/// marker after each rule. Operations wait on the gate in arrival order.
/// If a rule fails, every operation returns `StoreError::Migration`.
pub struct MigrationStore<R: Record, S: Store<R>> {
    name: String,
    gate: Arc<RwLock<()>>,
    state: Arc<OnceLock<Result<Ready<S>, StoreError>>>,
    listeners: Arc<Listeners<R>>,
}

impl<R: Record, S: Store<R> + 'static> MigrationStore<R, S> {
    pub fn new<V>(
        name: impl Into<String>,
        delegate: S,
        versions: V,
        app_version: u32,
        rules: Vec<MigrationRule<S>>,
    ) -> Self
    where
        V: Store<StoreVersion> + 'static,
    {
        let name = name.into();
        let gate = Arc::new(RwLock::new(()));
        let state = Arc::new(OnceLock::new());
        let listeners = Arc::new(Listeners::new());

        let write = gate.clone().try_write_owned().ok();
        let task_state = state.clone();
        let task_listeners = listeners.clone();
        let task_name = name.clone();
        tokio::spawn(async move {
            let delegate = Arc::new(delegate);
            let result = migrate::<R, S, V>(&task_name, delegate.clone(), &versions, app_version, rules)
                .await
                .map(|()| {
                    let relay = delegate.listen(
                        Box::new(Relay {
                            listeners: task_listeners,
                        }),
                        SelectOptions::default(),
                    );
                    Ready {
                        store: delegate,
                        relay,
                    }
                });
            if let Err(err) = &result {
                warn!(store = %task_name, error = %err, "migration failed");
            }
            let _ = task_state.set(result);
            drop(write);
        });

        MigrationStore {
            name,
            gate,
            state,
            listeners,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves once migrations finished.
    pub async fn ready(&self) -> StoreResult<()> {
        self.delegate().await.map(|_| ())
    }

    async fn delegate(&self) -> StoreResult<Arc<S>> {
        drop(self.gate.read().await);
        match self.state.get() {
            Some(Ok(ready)) => Ok(ready.store.clone()),
            Some(Err(err)) => Err(err.clone()),
            None => Err(StoreError::Migration {
                name: self.name.clone(),
                version: 0,
                detail: "migration task ended without a result".into(),
            }),
        }
    }
}

async fn migrate<R, S, V>(
    name: &str,
    delegate: Arc<S>,
    versions: &V,
    app_version: u32,
    rules: Vec<MigrationRule<S>>,
) -> StoreResult<()>
where
    R: Record,
    S: Store<R> + 'static,
    V: Store<StoreVersion>,
{
    let failed = |version: u32, err: StoreError| StoreError::Migration {
        name: name.to_string(),
        version,
        detail: err.to_string(),
    };

    let stored = match versions.find(&Key::from(name)).await {
        Ok(marker) => marker.version,
        Err(err) if err.is_not_found() => 0,
        Err(err) => return Err(failed(0, err)),
    };

    let mut pending: Vec<MigrationRule<S>> = rules
        .into_iter()
        .filter(|rule| rule.version > stored && rule.version <= app_version)
        .collect();
    pending.sort_by_key(|rule| rule.version);

    for rule in pending {
        info!(store = %name, from = stored, version = rule.version, "applying migration");
        rule.run(delegate.clone())
            .await
            .map_err(|err| failed(rule.version, err))?;
        versions
            .put(StoreVersion {
                name: name.to_string(),
                version: rule.version,
            })
            .await
            .map_err(|err| failed(rule.version, err))?;
    }
    Ok(())
}

impl<R: Record, S: Store<R>> Drop for MigrationStore<R, S> {
    fn drop(&mut self) {
        if let Some(Ok(ready)) = self.state.get() {
            ready.store.unlisten(ready.relay);
        }
    }
}

#[async_trait]
impl<R: Record, S: Store<R> + 'static> Store<R> for MigrationStore<R, S> {
    async fn put(&self, record: R) -> StoreResult<R> {
        self.delegate().await?.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        self.delegate().await?.remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.delegate().await?.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        match self.delegate().await {
            Ok(store) => store.select(sink, options).await,
            Err(err) => fail(sink, err).await,
        }
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        match self.delegate().await {
            Ok(store) => store.remove_all(sink, options).await,
            Err(err) => fail(sink, err).await,
        }
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.listeners.add(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Operation;
    use crate::store::{InMemoryStore, StoreExt};
    use crate::testing::{issue, Issue};
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<u32>>>;

    fn logging_rule(version: u32, log: &Log) -> MigrationRule<InMemoryStore<Issue>> {
        let log = log.clone();
        MigrationRule::new(version, move |store: Arc<InMemoryStore<Issue>>| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(version);
                store.put(issue(version as i64)).await?;
                Ok::<(), StoreError>(())
            }
        })
    }

    #[tokio::test]
    async fn runs_pending_rules_in_order_and_records_version() {
        let log: Log = Arc::default();
        let versions = InMemoryStore::<StoreVersion>::new();
        let store = MigrationStore::new(
            "issues",
            InMemoryStore::new(),
            versions.clone(),
            3,
            vec![logging_rule(3, &log), logging_rule(1, &log), logging_rule(2, &log)],
        );
        store.ready().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        let marker = versions.find(&Key::from("issues")).await.unwrap();
        assert_eq!(marker.version, 3);
        assert_eq!(store.select_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rerun_with_current_marker_is_a_noop() {
        let log: Log = Arc::default();
        let versions = InMemoryStore::<StoreVersion>::new();
        let data = InMemoryStore::new();

        let first = MigrationStore::new("issues", data.clone(), versions.clone(), 2, vec![
            logging_rule(1, &log),
            logging_rule(2, &log),
        ]);
        first.ready().await.unwrap();

        let second = MigrationStore::new("issues", data.clone(), versions.clone(), 2, vec![
            logging_rule(1, &log),
            logging_rule(2, &log),
        ]);
        second.ready().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn rules_beyond_app_version_wait() {
        let log: Log = Arc::default();
        let versions = InMemoryStore::<StoreVersion>::new();
        versions
            .put(StoreVersion {
                name: "issues".into(),
                version: 1,
            })
            .await
            .unwrap();

        let store = MigrationStore::new("issues", InMemoryStore::new(), versions.clone(), 2, vec![
            logging_rule(1, &log),
            logging_rule(2, &log),
            logging_rule(3, &log),
        ]);
        store.ready().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![2]);
        assert_eq!(versions.find(&Key::from("issues")).await.unwrap().version, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_wait_for_migration() {
        let slow = MigrationRule::new(1, |store: Arc<InMemoryStore<Issue>>| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            store.put(issue(1)).await?;
            Ok::<(), StoreError>(())
        });
        let store = MigrationStore::new(
            "issues",
            InMemoryStore::new(),
            InMemoryStore::<StoreVersion>::new(),
            1,
            vec![slow],
        );
        assert_eq!(store.find(&Key::from(1)).await.unwrap(), issue(1));
    }

    #[tokio::test]
    async fn failed_migration_fails_operations() {
        let versions = InMemoryStore::<StoreVersion>::new();
        let log: Log = Arc::default();
        let broken = MigrationRule::new(2, |_store: Arc<InMemoryStore<Issue>>| async move {
            Err::<(), _>(StoreError::rejected(Operation::Put, "bad data"))
        });
        let store = MigrationStore::new(
            "issues",
            InMemoryStore::new(),
            versions.clone(),
            2,
            vec![logging_rule(1, &log), broken],
        );

        match store.find(&Key::from(1)).await {
            Err(StoreError::Migration { version, .. }) => assert_eq!(version, 2),
            other => panic!("expected migration error, got {:?}", other),
        }
        assert_eq!(versions.find(&Key::from("issues")).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn listeners_see_writes_after_migration() {
        let store = MigrationStore::new(
            "issues",
            InMemoryStore::<Issue>::new(),
            InMemoryStore::<StoreVersion>::new(),
            0,
            Vec::new(),
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SinkEvent<Issue>>();
        store.listen(Box::new(tx), SelectOptions::default());
        store.put(issue(4)).await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Put(i)) if i.id == 4));
    }
}
