//! REST adapter: a `Store` backed by a paged JSON collection endpoint.

mod store;
mod transport;

pub use store::{RestStore, DEFAULT_BATCH_SIZE, DEFAULT_SKIP_THRESHOLD};
#[cfg(feature = "http")]
pub use transport::ReqwestTransport;
pub use transport::{RestMethod, RestRequest, RestResponse, RestTransport};
