//! Sinks receive streamed records and completion signals.
//!
//! Every `select`/`remove_all` delivers zero or more `Put`/`Remove` events
//! followed by exactly one `Eof` or `Error`. The sink steers the stream
//! through the `FlowControl` handed to it with each event.

mod collect;
mod flow;

use async_trait::async_trait;

use crate::error::{Operation, StoreError, StoreResult};

pub use collect::{Collector, CountSink, FnSink, NullSink};
pub use flow::FlowControl;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent<R> {
    Put(R),
    Remove(R),
    Error(StoreError),
    Eof,
}

#[async_trait]
pub trait Sink<R>: Send {
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl);
}

#[async_trait]
impl<R: Send + 'static, S: Sink<R> + ?Sized> Sink<R> for Box<S> {
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl) {
        (**self).handle(event, fc).await
    }
}

/// Events forwarded to a channel; a closed receiver stops the stream.
#[async_trait]
impl<R: Send + 'static> Sink<R> for tokio::sync::mpsc::UnboundedSender<SinkEvent<R>> {
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl) {
        if self.send(event).is_err() {
            fc.stop();
        }
    }
}

/// One in-progress delivery to a sink.
///
/// Checks flow control before every record and before the terminal
/// event; once the sink has stopped or failed the stream, the terminal
/// event is `Error(Aborted)` instead of `Eof`.
pub struct Delivery<'a, R> {
    sink: &'a mut dyn Sink<R>,
    fc: FlowControl,
    op: Operation,
    delivered: usize,
}

impl<'a, R: Send + 'static> Delivery<'a, R> {
    pub fn new(sink: &'a mut dyn Sink<R>, op: Operation) -> Self {
        Delivery {
            sink,
            fc: FlowControl::new(),
            op,
            delivered: 0,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.fc.is_stopped()
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Delivers one record. Returns `false` once the sink wants no more.
    pub async fn send(&mut self, record: R) -> bool {
        if self.fc.is_stopped() {
            return false;
        }
        let event = match self.op {
            Operation::RemoveAll | Operation::Remove => SinkEvent::Remove(record),
            _ => SinkEvent::Put(record),
        };
        self.sink.handle(event, &self.fc).await;
        self.delivered += 1;
        !self.fc.is_stopped()
    }

    pub async fn finish(self) -> StoreResult<()> {
        match self.fc.interrupted(self.op) {
            Some(err) => self.fail(err).await,
            None => {
                self.sink.handle(SinkEvent::Eof, &self.fc).await;
                Ok(())
            }
        }
    }

    pub async fn fail(self, err: StoreError) -> StoreResult<()> {
        self.sink.handle(SinkEvent::Error(err.clone()), &self.fc).await;
        Err(err)
    }
}

/// Streams `records` into `sink`, then signals completion.
pub async fn stream_into<R, I>(sink: &mut dyn Sink<R>, records: I, op: Operation) -> StoreResult<()>
where
    R: Send + 'static,
    I: IntoIterator<Item = R>,
    I::IntoIter: Send,
{
    let mut delivery = Delivery::new(sink, op);
    for record in records {
        if !delivery.send(record).await {
            break;
        }
    }
    delivery.finish().await
}

/// Reports a failure to `sink` and returns it.
pub async fn fail<R: Send + 'static>(sink: &mut dyn Sink<R>, err: StoreError) -> StoreResult<()> {
    Delivery::new(sink, err.op().unwrap_or(Operation::Select))
        .fail(err)
        .await
}
