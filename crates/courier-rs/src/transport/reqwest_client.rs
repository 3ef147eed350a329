//! Default transport backed by `reqwest`.

use super::{Response, Transport, TransportBody, TransportFuture, TransportInit};
use crate::error::{Error, RequestError, Result};
use http::header::CONTENT_LENGTH;
use tracing::trace;

pub const DEFAULT_USER_AGENT: &str = concat!("courier-rs/", env!("CARGO_PKG_VERSION"));

/// [`Transport`] over a shared `reqwest::Client`.
///
/// Request timeouts are owned by the engine, so the client is built without
/// one.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, url: String, init: TransportInit) -> TransportFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let TransportInit {
                method,
                headers,
                body,
                signal,
                ..
            } = init;
            trace!(%method, %url, "sending via reqwest");

            let mut request = client.request(method, &url).headers(headers);
            request = match body {
                None => request,
                Some(TransportBody::Full(bytes)) => request.body(bytes),
                Some(TransportBody::Stream { stream, length }) => request
                    .header(CONTENT_LENGTH, length)
                    .body(reqwest::Body::wrap_stream(stream)),
            };

            let response = signal
                .guard(request.send())
                .await?
                .map_err(RequestError::network)?;
            Ok(Response::from_reqwest(response))
        })
    }
}
