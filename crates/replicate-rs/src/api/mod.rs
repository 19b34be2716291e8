//! HTTP layer: requests, retry, pagination, and SSE streaming.
//!
//! These modules sit between the client namespaces and the wire:
//!
//! - [`request`]: [`ApiRequest`] and response classification (2xx passes,
//!   anything else becomes an [`ApiError`](crate::error::ApiError)).
//! - `routes`: the request for each operation, shared by both clients.
//! - [`retry`]: [`RetryConfig`], exponential backoff with jitter honoring
//!   `Retry-After`. Never retries 4xx other than 429.
//! - [`transport`]: the [`Transport`] / [`AsyncTransport`] seam and the
//!   [`RetryTransport`] decorator over either flavor.
//! - [`pagination`]: [`Cursor`], [`Page`], and lazy page walks.
//! - [`streaming`]: SSE decoder and the blocking/async event streams.

pub mod pagination;
pub mod request;
pub mod retry;
pub(crate) mod routes;
pub mod streaming;
pub mod transport;

pub use pagination::{Cursor, Page, Paginator, paginate, paginate_async};
pub use request::ApiRequest;
pub use retry::RetryConfig;
pub use streaming::{AsyncEventStream, EventStream, EventType, ServerSentEvent, SseDecoder};
pub use transport::{AsyncTransport, RetryTransport, Transport, TransportFuture};
