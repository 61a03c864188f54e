//! RestStore - paged remote collection behind a `RestTransport`.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::{orders_to_mql, Expr, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::{Delivery, Sink};
use crate::store::{ListenerId, Listeners, Store};

use super::transport::{RestRequest, RestResponse, RestTransport};

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_SKIP_THRESHOLD: usize = 1000;

/// A page of results: `{"items": [...], "totalResults": n}`.
struct Page {
    items: Vec<Value>,
    total_results: Option<usize>,
}

impl Page {
    fn parse(body: Value) -> Page {
        let total_results = body
            .get("totalResults")
            .and_then(Value::as_u64)
            .map(|n| n as usize);
        let items = match body {
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Page {
            items,
            total_results,
        }
    }
}

/// A `Store` over a REST collection at `url`.
///
/// `select` sends the query-language rendering of the query parts the
/// server understands as `q`, the order as `sort`, and pages with
/// `maxResults`/`startIndex`. Every returned item is re-checked against
/// the full query, since server-side matching may be coarser.
pub struct RestStore<R: Record, T> {
    transport: T,
    url: String,
    batch_size: usize,
    skip_threshold: usize,
    listeners: Listeners<R>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record, T: RestTransport> RestStore<R, T> {
    pub fn new(transport: T, url: impl Into<String>) -> Self {
        RestStore {
            transport,
            url: url.into().trim_end_matches('/').to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            skip_threshold: DEFAULT_SKIP_THRESHOLD,
            listeners: Listeners::new(),
            _record: PhantomData,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_skip_threshold(mut self, skip_threshold: usize) -> Self {
        self.skip_threshold = skip_threshold;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn key_url(&self, key: &Key) -> String {
        format!("{}/{}", self.url, key)
    }

    async fn call(&self, request: RestRequest, op: Operation) -> StoreResult<RestResponse> {
        let method = request.method;
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| err.with_op(op))?;
        if response.is_success() {
            Ok(response)
        } else {
            warn!(
                collection = R::COLLECTION,
                %method,
                status = response.status,
                "request failed"
            );
            Err(StoreError::transport(
                op,
                format!("{} returned status {}", method, response.status),
            ))
        }
    }

    /// The query string and the residual filter for `options`.
    fn select_params(&self, options: &SelectOptions) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(query) = &options.query {
            let (remote, _) = query.split(|leaf: &Expr| leaf.to_mql().is_some());
            if let Some(mql) = remote.to_mql().filter(|q| !q.is_empty()) {
                params.push(("q".to_string(), mql));
            }
        }
        if !options.order.is_empty() {
            params.push(("sort".to_string(), orders_to_mql(&options.order)));
        }
        params
    }

    async fn fetch(
        &self,
        delivery: &mut Delivery<'_, R>,
        options: &SelectOptions,
    ) -> StoreResult<()> {
        let params = self.select_params(options);
        let mut index = options.skip;
        let mut remaining = options.limit;
        let mut skipped = 0;

        loop {
            let batch = match remaining {
                Some(remaining) => self.batch_size.min(remaining),
                None => self.batch_size,
            };
            let mut request = RestRequest::get(self.url.clone());
            request.params = params.clone();
            let request = request
                .param("maxResults", batch)
                .param("startIndex", index);

            let response = self.call(request, Operation::Select).await?;
            let page = Page::parse(response.body);
            debug!(
                collection = R::COLLECTION,
                start = index,
                items = page.items.len(),
                "fetched page"
            );
            if page.items.is_empty() {
                return Ok(());
            }
            index += page.items.len();

            for item in page.items {
                if !options.matches_value(&item) {
                    skipped += 1;
                    continue;
                }
                if remaining == Some(0) {
                    return Ok(());
                }
                let record = R::from_value(item)?;
                remaining = remaining.map(|n| n - 1);
                if !delivery.send(record).await {
                    return Ok(());
                }
            }

            if remaining == Some(0)
                || page.total_results.is_some_and(|total| index >= total)
                || skipped >= self.skip_threshold
            {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl<R: Record, T: RestTransport> Store<R> for RestStore<R, T> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let request = RestRequest::post(self.url.clone(), record.to_value()?);
        let response = self.call(request, Operation::Put).await?;
        let stored = match response.body {
            Value::Null => record,
            body => R::from_value(body)?,
        };
        self.listeners.notify_put(&stored).await;
        Ok(stored)
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let record = self
            .find(key)
            .await
            .map_err(|err| err.with_op(Operation::Remove))?;
        let response = self
            .transport
            .send(RestRequest::delete(self.key_url(key)))
            .await
            .map_err(|err| err.with_op(Operation::Remove))?;
        match response.status {
            404 => return Err(StoreError::not_found(Operation::Remove, key)),
            status if !(200..300).contains(&status) => {
                return Err(StoreError::transport(
                    Operation::Remove,
                    format!("DELETE returned status {}", status),
                ))
            }
            _ => {}
        }
        self.listeners.notify_remove(&record).await;
        Ok(record)
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        let response = self
            .transport
            .send(RestRequest::get(self.key_url(key)))
            .await
            .map_err(|err| err.with_op(Operation::Find))?;
        match response.status {
            404 => Err(StoreError::not_found(Operation::Find, key)),
            status if (200..300).contains(&status) => match response.body {
                Value::Null => Err(StoreError::not_found(Operation::Find, key)),
                body => R::from_value(body),
            },
            status => Err(StoreError::transport(
                Operation::Find,
                format!("GET returned status {}", status),
            )),
        }
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let mut delivery = Delivery::new(sink, Operation::Select);
        match self.fetch(&mut delivery, options).await {
            Ok(()) => delivery.finish().await,
            Err(err) => delivery.fail(err.with_op(Operation::Select)).await,
        }
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let mut matching = Vec::new();
        if let Err(err) = self.select(&mut matching, options).await {
            return Delivery::new(sink, Operation::RemoveAll)
                .fail(err.with_op(Operation::RemoveAll))
                .await;
        }
        let mut delivery = Delivery::new(sink, Operation::RemoveAll);
        for record in matching {
            match self.remove(&record.key()).await {
                Ok(removed) => {
                    if !delivery.send(removed).await {
                        break;
                    }
                }
                Err(err) if err.is_not_found() => continue,
                Err(err) => return delivery.fail(err.with_op(Operation::RemoveAll)).await,
            }
        }
        delivery.finish().await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.listeners.add(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
