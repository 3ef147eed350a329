//! Declarative HTTP and server-sent-events requests with an interceptor
//! pipeline.
//!
//! `courier-rs` builds one-shot requests from a shared [`Factory`]. Each
//! request carries its own configuration (URL template, path and query
//! parameters, headers, body, timeout, interceptors, transformers) and runs
//! exactly once through a fixed pipeline:
//!
//! request interceptors → body encoding → URL finalization → transport →
//! response interceptors → body parsing → transformers
//!
//! Failures at any stage are normalized to a [`RequestError`] (HTTP status,
//! or `-1` for aborts and transport failures) and handed to the error
//! interceptors before `execute()` returns.
//!
//! # Getting started
//!
//! ```ignore
//! use courier_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> courier_rs::Result<()> {
//!     let factory = Factory::builder()
//!         .with_base_url("https://api.example.com/v1")
//!         .build()?;
//!     factory.use_feature(RetryFeature::new(RetryPolicy::new(2)))?;
//!     factory.default_header("x-client", "courier");
//!
//!     let user = factory
//!         .get("/users/{{id}}")
//!         .path_param("id", "42")
//!         .query("expand", "teams")
//!         .timeout(Duration::from_secs(5))
//!         .execute()
//!         .await?;
//!     println!("{}", user.as_json().unwrap());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Build and run requests:** [`Factory`], [`RequestBuilder`] for every
//!   configuration method, [`Request::execute`].
//! - **Hook into the pipeline:** [`engine::interceptor`] for request,
//!   response and error interceptors and transformers;
//!   [`RequestControl`] for what an interceptor may change.
//! - **Factory-wide defaults:** [`Factory::always`], [`Factory::when`] and
//!   the `default_*` shorthands; [`FactoryConfig`] to load them from JSON.
//! - **Optional behavior:** [`features`] for retry, upload and download
//!   progress, request hashing and adapters.
//! - **Streams:** [`Factory::stream`] returns a [`StreamRequest`]; its
//!   [`Subscription`] closes the stream.
//! - **Never-failing results:** [`Factory::wrapped`] switches `execute()`
//!   to [`WrappedResponse`].
//! - **Swap the network:** implement [`Transport`] or [`StreamConnector`],
//!   or wrap a closure with [`transport_fn`](transport::transport_fn) /
//!   [`connector_fn`](transport::connector_fn).

pub mod body;
pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod features;
pub mod log;
pub mod payload;
pub mod prelude;
pub mod transport;
pub mod url;

pub use body::RequestBody;
pub use config::{ConfigView, Credentials, Deferred, QueryValue, RequestConfig, RequestMode};
pub use engine::{
    AbortReason, AbortSignal, Intercept, Plain, Request, RequestBuilder, RequestControl,
    StreamRequest, Subscription, Wrapped, WrappedResponse, WrappedSubscription,
};
pub use error::{Error, ErrorContext, ErrorKind, RequestError, Result};
pub use factory::{Factory, FactoryBuilder, FactoryConfig};
pub use log::{LogLevel, Logger};
pub use payload::Payload;
pub use transport::{Response, ResponseHead, StreamConnector, Transport};
