use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{redirect, Method, Proxy, Url};
use thiserror::Error;

use crate::headers::{HeaderSet, DEFAULT_USER_AGENT};

/// One fully built request attempt.
#[derive(Clone, Debug)]
pub struct ProbeRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderSet,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request error: {0}")]
    Request(String),
}

impl TransportError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_builder() || e.is_decode() || e.is_redirect() {
            TransportError::Request(e.to_string())
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("failed to setup proxy: {proxy}: {source}")]
    Proxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {source}")]
    Build {
        #[source]
        source: reqwest::Error,
    },
}

/// The network seam of the executor. Implementations must be cheap to share
/// across workers; the executor never mutates them.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a ProbeRequest)
        -> BoxFuture<'a, Result<RawResponse, TransportError>>;
}

/// `reqwest` backed transport. The client's connection pool is shared by
/// every worker holding a clone.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, proxy: Option<&str>) -> Result<Self, ClientBuildError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(DEFAULT_USER_AGENT),
        );

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .danger_accept_invalid_hostnames(true)
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
            let p = Proxy::all(proxy).map_err(|e| ClientBuildError::Proxy {
                proxy: proxy.to_string(),
                source: e,
            })?;
            builder = builder.proxy(p);
        }

        let client = builder
            .build()
            .map_err(|e| ClientBuildError::Build { source: e })?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a ProbeRequest,
    ) -> BoxFuture<'a, Result<RawResponse, TransportError>> {
        async move {
            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone())
                .timeout(request.timeout);
            for (name, value) in request.headers.iter() {
                builder = builder.header(name, value);
            }

            let resp = builder.send().await.map_err(TransportError::from_reqwest)?;
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());
            let body = resp.text().await.map_err(TransportError::from_reqwest)?;

            Ok(RawResponse {
                status,
                retry_after,
                body,
            })
        }
        .boxed()
    }
}
