//! Gzip response compression middleware.
//!
//! Compresses response bodies with gzip when the client advertises support
//! for it and the request's host is on a configured domain list. Encoders
//! are pooled and reused across responses.
//!
//! The middleware works in two ways:
//! - as a [`Handler`] decorator, where the response body is written to a
//!   [`ResponseSink`] carried by a [`Context`];
//! - as a Tower layer over `http` services, where the response body is
//!   wrapped in a [`GzipBody`].
//!
//! # Example
//!
//! ```ignore
//! use http_response_gzip::{GzipConfig, GzipLayer};
//! use tower::ServiceBuilder;
//!
//! let config = GzipConfig::new().level(6).domain("*.example.com");
//!
//! let service = ServiceBuilder::new()
//!     .layer(GzipLayer::new(&config)?)
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! A response is compressed when:
//! - the request's `Accept-Encoding` header contains `gzip`
//!   (case-sensitive substring match)
//! - the request host matches the domain list, or the list is empty
//!
//! Domain patterns come in three forms:
//! - `example.com` matches that host exactly
//! - `static.*` matches hosts starting with `static.`
//! - `*.example.com` matches hosts ending with `.example.com`
//!
//! On the Tower path, responses that already carry `Content-Encoding` or
//! `Content-Range` pass through untouched.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to `gzip`
//! - `Vary` includes `accept-encoding`
//! - `Content-Length` and `Accept-Ranges` are removed (Tower path)
//!
//! The middleware does not translate handler errors into responses. Place
//! any error translation inside it, so that error pages are compressed too.

#![deny(missing_docs)]

mod body;
mod codec;
mod config;
mod context;
mod domain;
mod error;
mod future;
mod hooks;
mod layer;
mod pool;
mod response;
mod service;
mod session;
mod validator;

pub use body::GzipBody;
pub use codec::{GzipEncoder, Level};
pub use config::GzipConfig;
pub use context::{Context, Handler, HandlerFn, ResponseSink, handler_fn};
pub use domain::{DomainMatcher, split_host};
pub use error::{BoxError, ConfigError, ReleaseError};
pub use future::ResponseFuture;
pub use hooks::ExitHooks;
pub use layer::GzipLayer;
pub use pool::{DEFAULT_MAX_IDLE, GzipPool, PooledWriter};
pub use response::GzipResponse;
pub use service::Gzip;
pub use session::{MemorySession, SessionStore};
pub use validator::{NothingValidator, Validator, ValidatorFn, validator_fn};
