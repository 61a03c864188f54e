//! CascadingRemoveStore - removing a parent removes its children first.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Operation, StoreResult};
use crate::query::{Expr, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::{fail, stream_into, NullSink, Sink};
use crate::store::{ListenerId, Store};

/// A `Store` decorator that deletes child records whose `field` refers
/// to a removed parent's key.
pub struct CascadingRemoveStore<R, S, C, CS> {
    delegate: S,
    children: CS,
    field: String,
    _records: PhantomData<fn() -> (R, C)>,
}

impl<R, S, C, CS> CascadingRemoveStore<R, S, C, CS>
where
    R: Record,
    S: Store<R>,
    C: Record,
    CS: Store<C>,
{
    pub fn new(delegate: S, children: CS, field: impl Into<String>) -> Self {
        CascadingRemoveStore {
            delegate,
            children,
            field: field.into(),
            _records: PhantomData,
        }
    }

    pub fn children(&self) -> &CS {
        &self.children
    }

    async fn remove_children(&self, keys: Vec<Key>) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let query = Expr::In(self.field.clone(), keys.iter().map(Key::to_value).collect());
        debug!(
            collection = C::COLLECTION,
            field = %self.field,
            parents = keys.len(),
            "cascading remove"
        );
        let options = SelectOptions::new().with_query(query.normalize());
        self.children.remove_all(&mut NullSink, &options).await
    }
}

#[async_trait]
impl<R, S, C, CS> Store<R> for CascadingRemoveStore<R, S, C, CS>
where
    R: Record,
    S: Store<R>,
    C: Record,
    CS: Store<C>,
{
    async fn put(&self, record: R) -> StoreResult<R> {
        self.delegate.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        self.remove_children(vec![key.clone()])
            .await
            .map_err(|err| err.with_op(Operation::Remove))?;
        self.delegate.remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.delegate.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.delegate.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let mut parents: Vec<R> = Vec::new();
        if let Err(err) = self.delegate.select(&mut parents, options).await {
            return fail(sink, err.with_op(Operation::RemoveAll)).await;
        }
        let keys = parents.iter().map(Record::key).collect();

        let mut removed: Vec<R> = Vec::new();
        let (children, parents) = tokio::join!(
            self.remove_children(keys),
            self.delegate.remove_all(&mut removed, options)
        );
        if let Err(err) = children.and(parents) {
            return fail(sink, err.with_op(Operation::RemoveAll)).await;
        }
        stream_into(sink, removed, Operation::RemoveAll).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.delegate.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.delegate.unlisten(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::eq;
    use crate::store::{InMemoryStore, StoreExt};
    use crate::testing::{issue, seeded, Issue};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize, crate::Record)]
    #[record(collection = "comments")]
    struct Comment {
        id: i64,
        issue_id: i64,
        body: String,
    }

    fn comments() -> InMemoryStore<Comment> {
        InMemoryStore::from_records((1..=6).map(|id| Comment {
            id,
            issue_id: (id + 1) / 2,
            body: format!("comment {}", id),
        }))
    }

    #[tokio::test]
    async fn remove_deletes_children_then_parent() {
        let children = comments();
        let store: CascadingRemoveStore<Issue, _, Comment, _> =
            CascadingRemoveStore::new(seeded(3), children.clone(), "issue_id");

        assert_eq!(store.remove(&Key::from(2)).await.unwrap(), issue(2));
        let left: Vec<i64> = children
            .select_all()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(left, vec![1, 2, 5, 6]);
    }

    #[tokio::test]
    async fn remove_all_cascades_for_matching_parents() {
        let children = comments();
        let store: CascadingRemoveStore<Issue, _, Comment, _> =
            CascadingRemoveStore::new(seeded(3), children.clone(), "issue_id");

        let removed = store
            .remove_matching(&SelectOptions::new().with_query(eq("status", "Fixed")))
            .await
            .unwrap();
        let removed: Vec<i64> = removed.iter().map(|i| i.id).collect();
        assert_eq!(removed, vec![1, 3]);

        let left: Vec<i64> = children
            .select_all()
            .await
            .unwrap()
            .iter()
            .map(|c| c.issue_id)
            .collect();
        assert_eq!(left, vec![2, 2]);
    }

    #[tokio::test]
    async fn childless_parent_is_removed() {
        let store: CascadingRemoveStore<Issue, _, Comment, _> =
            CascadingRemoveStore::new(seeded(5), comments(), "issue_id");
        store.remove(&Key::from(5)).await.unwrap();
        assert!(store.find(&Key::from(5)).await.unwrap_err().is_not_found());
    }
}
