//! AdapterStore - presents a store of one record type as another.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{FlowControl, Sink, SinkEvent};
use crate::store::{ListenerId, Store};

/// Two-way mapping between the exposed type `A` and the stored type `B`.
pub trait Adapter<A, B>: Send + Sync + 'static {
    fn a_to_b(&self, a: A) -> B;

    fn b_to_a(&self, b: B) -> A;

    /// Keys usually mean the same thing on both sides.
    fn adapt_key(&self, key: &Key) -> Key {
        key.clone()
    }

    fn adapt_options(&self, options: &SelectOptions) -> SelectOptions {
        options.clone()
    }
}

fn adapt_event<A, B, AD: Adapter<A, B> + ?Sized>(adapter: &AD, event: SinkEvent<B>) -> SinkEvent<A> {
    match event {
        SinkEvent::Put(b) => SinkEvent::Put(adapter.b_to_a(b)),
        SinkEvent::Remove(b) => SinkEvent::Remove(adapter.b_to_a(b)),
        SinkEvent::Error(err) => SinkEvent::Error(err),
        SinkEvent::Eof => SinkEvent::Eof,
    }
}

struct AdaptingSink<'a, A, AD> {
    inner: &'a mut dyn Sink<A>,
    adapter: &'a AD,
}

#[async_trait]
impl<'a, A, B, AD> Sink<B> for AdaptingSink<'a, A, AD>
where
    A: Send + 'static,
    B: Send + 'static,
    AD: Adapter<A, B>,
{
    async fn handle(&mut self, event: SinkEvent<B>, fc: &FlowControl) {
        let event = adapt_event(self.adapter, event);
        self.inner.handle(event, fc).await
    }
}

struct AdaptingListener<A, AD> {
    inner: Box<dyn Sink<A>>,
    adapter: Arc<AD>,
}

#[async_trait]
impl<A, B, AD> Sink<B> for AdaptingListener<A, AD>
where
    A: Send + 'static,
    B: Send + 'static,
    AD: Adapter<A, B>,
{
    async fn handle(&mut self, event: SinkEvent<B>, fc: &FlowControl) {
        let event = adapt_event(self.adapter.as_ref(), event);
        self.inner.handle(event, fc).await
    }
}

/// A `Store<A>` over a delegate `Store<B>`; every record, key, option
/// set, and sink passing through is converted by the adapter.
pub struct AdapterStore<A, B, S, AD> {
    delegate: S,
    adapter: Arc<AD>,
    _records: PhantomData<fn() -> (A, B)>,
}

impl<A, B, S, AD> AdapterStore<A, B, S, AD>
where
    A: Record,
    B: Record,
    S: Store<B>,
    AD: Adapter<A, B>,
{
    pub fn new(delegate: S, adapter: AD) -> Self {
        AdapterStore {
            delegate,
            adapter: Arc::new(adapter),
            _records: PhantomData,
        }
    }
}

#[async_trait]
impl<A, B, S, AD> Store<A> for AdapterStore<A, B, S, AD>
where
    A: Record,
    B: Record,
    S: Store<B>,
    AD: Adapter<A, B>,
{
    async fn put(&self, record: A) -> StoreResult<A> {
        let stored = self.delegate.put(self.adapter.a_to_b(record)).await?;
        Ok(self.adapter.b_to_a(stored))
    }

    async fn remove(&self, key: &Key) -> StoreResult<A> {
        let removed = self.delegate.remove(&self.adapter.adapt_key(key)).await?;
        Ok(self.adapter.b_to_a(removed))
    }

    async fn find(&self, key: &Key) -> StoreResult<A> {
        let found = self.delegate.find(&self.adapter.adapt_key(key)).await?;
        Ok(self.adapter.b_to_a(found))
    }

    async fn select(&self, sink: &mut dyn Sink<A>, options: &SelectOptions) -> StoreResult<()> {
        let options = self.adapter.adapt_options(options);
        let mut adapting = AdaptingSink {
            inner: sink,
            adapter: self.adapter.as_ref(),
        };
        self.delegate.select(&mut adapting, &options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<A>, options: &SelectOptions) -> StoreResult<()> {
        let options = self.adapter.adapt_options(options);
        let mut adapting = AdaptingSink {
            inner: sink,
            adapter: self.adapter.as_ref(),
        };
        self.delegate.remove_all(&mut adapting, &options).await
    }

    fn listen(&self, sink: Box<dyn Sink<A>>, options: SelectOptions) -> ListenerId {
        let options = self.adapter.adapt_options(&options);
        let listener = AdaptingListener {
            inner: sink,
            adapter: self.adapter.clone(),
        };
        self.delegate.listen(Box::new(listener), options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.delegate.unlisten(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{eq, Expr};
    use crate::store::{InMemoryStore, StoreExt};
    use crate::testing::{issue, seeded, Issue};
    use serde::{Deserialize, Serialize};
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, crate::Record)]
    #[record(collection = "tickets")]
    struct Ticket {
        id: i64,
        summary: String,
        closed: bool,
    }

    struct TicketAdapter;

    impl Adapter<Ticket, Issue> for TicketAdapter {
        fn a_to_b(&self, t: Ticket) -> Issue {
            Issue {
                id: t.id,
                title: t.summary,
                status: if t.closed { "Fixed".into() } else { "Open".into() },
                priority: 0,
            }
        }

        fn b_to_a(&self, i: Issue) -> Ticket {
            Ticket {
                id: i.id,
                summary: i.title,
                closed: i.status == "Fixed",
            }
        }

        fn adapt_options(&self, options: &SelectOptions) -> SelectOptions {
            let mut adapted = options.clone();
            adapted.query = options.query.clone().map(|q| match q {
                Expr::Eq(field, value) if field == "closed" => {
                    eq("status", if value == true { "Fixed" } else { "Open" })
                }
                other => other,
            });
            adapted
        }
    }

    #[tokio::test]
    async fn converts_both_ways() {
        let backing = seeded(4);
        let tickets = AdapterStore::new(backing.clone(), TicketAdapter);

        let closed = tickets
            .select_vec(&SelectOptions::new().with_query(eq("closed", true)))
            .await
            .unwrap();
        assert_eq!(closed.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 3]);

        tickets
            .put(Ticket { id: 9, summary: "new".into(), closed: false })
            .await
            .unwrap();
        assert_eq!(backing.find(&Key::from(9)).await.unwrap().status, "Open");
        assert_eq!(tickets.find(&Key::from(2)).await.unwrap().summary, issue(2).title);
    }

    #[tokio::test]
    async fn listeners_see_adapted_records() {
        let backing: InMemoryStore<Issue> = InMemoryStore::new();
        let tickets = AdapterStore::new(backing.clone(), TicketAdapter);
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkEvent<Ticket>>();
        tickets.listen(Box::new(tx), SelectOptions::default());

        backing.put(issue(3)).await.unwrap();
        match rx.try_recv() {
            Ok(SinkEvent::Put(ticket)) => assert!(ticket.closed),
            other => panic!("unexpected {:?}", other),
        }
    }
}
