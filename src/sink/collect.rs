use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::StoreError;

use super::{FlowControl, Sink, SinkEvent};

#[async_trait]
impl<R: Send + 'static> Sink<R> for Vec<R> {
    async fn handle(&mut self, event: SinkEvent<R>, _fc: &FlowControl) {
        match event {
            SinkEvent::Put(record) | SinkEvent::Remove(record) => self.push(record),
            SinkEvent::Error(_) | SinkEvent::Eof => {}
        }
    }
}

/// Collects everything a stream delivers, including how it ended.
#[derive(Debug, Clone)]
pub struct Collector<R> {
    pub records: Vec<R>,
    pub removed: Vec<R>,
    pub eof: bool,
    pub error: Option<StoreError>,
    stop_after: Option<usize>,
}

impl<R> Default for Collector<R> {
    fn default() -> Self {
        Collector {
            records: Vec::new(),
            removed: Vec::new(),
            eof: false,
            error: None,
            stop_after: None,
        }
    }
}

impl<R> Collector<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the stream once `count` records arrived.
    pub fn stop_after(mut self, count: usize) -> Self {
        self.stop_after = Some(count);
        self
    }

    pub fn is_done(&self) -> bool {
        self.eof || self.error.is_some()
    }
}

#[async_trait]
impl<R: Send + 'static> Sink<R> for Collector<R> {
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl) {
        match event {
            SinkEvent::Put(record) => self.records.push(record),
            SinkEvent::Remove(record) => self.removed.push(record),
            SinkEvent::Error(err) => {
                self.error = Some(err);
                return;
            }
            SinkEvent::Eof => {
                self.eof = true;
                return;
            }
        }
        if let Some(limit) = self.stop_after {
            if self.records.len() + self.removed.len() >= limit {
                fc.stop();
            }
        }
    }
}

/// Counts records without keeping them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountSink {
    pub count: usize,
    pub eof: bool,
}

#[async_trait]
impl<R: Send + 'static> Sink<R> for CountSink {
    async fn handle(&mut self, event: SinkEvent<R>, _fc: &FlowControl) {
        match event {
            SinkEvent::Put(_) | SinkEvent::Remove(_) => self.count += 1,
            SinkEvent::Eof => self.eof = true,
            SinkEvent::Error(_) => {}
        }
    }
}

/// Sink backed by a closure.
pub struct FnSink<R, F> {
    f: F,
    _record: PhantomData<fn(R)>,
}

impl<R, F> FnSink<R, F>
where
    F: FnMut(SinkEvent<R>, &FlowControl) + Send,
{
    pub fn new(f: F) -> Self {
        FnSink {
            f,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R, F> Sink<R> for FnSink<R, F>
where
    R: Send + 'static,
    F: FnMut(SinkEvent<R>, &FlowControl) + Send,
{
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl) {
        (self.f)(event, fc)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl<R: Send + 'static> Sink<R> for NullSink {
    async fn handle(&mut self, _event: SinkEvent<R>, _fc: &FlowControl) {}
}
