//! Dials a runner's bind target and reverse-proxies HTTP to it (SPEC_FULL.md §4.5).
//!
//! The proxy rewrites `Host` to `localhost` and strips the inbound path
//! prefix up to and including `/v1/` so the upstream backend always sees an
//! OpenAI-standard path, regardless of how the dispatcher's own routes are
//! prefixed.

use std::path::Path;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::backend::BindTarget;
use crate::error::RuntimeError;

/// A client able to reach either a Unix-domain socket or a loopback TCP
/// address, depending on how the runner's backend was bound.
#[derive(Clone)]
pub enum Transport {
    Uds(Client<hyperlocal::UnixConnector, Full<Bytes>>),
    Tcp(Client<HttpConnector, Full<Bytes>>),
}

impl Transport {
    pub fn for_target(target: &BindTarget) -> Self {
        match target {
            BindTarget::Uds(_) => Transport::Uds(
                Client::builder(TokioExecutor::new()).build(hyperlocal::UnixConnector),
            ),
            BindTarget::Tcp(_) => {
                Transport::Tcp(Client::builder(TokioExecutor::new()).build(HttpConnector::new()))
            }
        }
    }

    fn build_uri(&self, target: &BindTarget, path_and_query: &str) -> Uri {
        match target {
            BindTarget::Uds(path) => hyperlocal::Uri::new(path, path_and_query).into(),
            BindTarget::Tcp(addr) => Uri::builder()
                .scheme("http")
                .authority(addr.to_string())
                .path_and_query(path_and_query)
                .build()
                .expect("valid TCP proxy URI"),
        }
    }

    /// Send a GET to `path` against `target` and return `true` on HTTP 200.
    pub async fn probe_ready(&self, target: &BindTarget, path: &str) -> bool {
        let uri = self.build_uri(target, path);
        let request = match Request::get(uri).body(Full::new(Bytes::new())) {
            Ok(r) => r,
            Err(_) => return false,
        };

        let result = match self {
            Transport::Uds(client) => client.request(request).await,
            Transport::Tcp(client) => client.request(request).await,
        };

        matches!(result, Ok(resp) if resp.status().is_success())
    }

    async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, RuntimeError> {
        let result = match self {
            Transport::Uds(client) => client.request(request).await,
            Transport::Tcp(client) => client.request(request).await,
        };
        result.map_err(|err| RuntimeError::Internal {
            message: format!("upstream proxy error: {err}"),
        })
    }
}

/// Strip `prefix` from `path` up to and including a trailing `/v1/`.
///
/// `<p>/{backend}/v1/chat/completions` with prefix `<p>/{backend}` becomes
/// `/v1/chat/completions`. If `path` doesn't contain `/v1/` at all, it is
/// passed through unchanged — some routes (`rerank`, `score`) aren't under
/// `/v1/`.
pub fn strip_to_v1(path: &str) -> &str {
    match path.find("/v1/") {
        Some(idx) => &path[idx..],
        None => path,
    }
}

/// Reverse-proxy one inbound request to `target`, rewriting `Host` to
/// `localhost` and the path via [`strip_to_v1`].
pub async fn forward(
    transport: &Transport,
    target: &BindTarget,
    mut request: Request<Full<Bytes>>,
) -> Result<Response<Incoming>, RuntimeError> {
    let original_path = request.uri().path().to_owned();
    let query = request.uri().query().map(str::to_owned);
    let new_path = strip_to_v1(&original_path);
    let path_and_query = match query {
        Some(q) => format!("{new_path}?{q}"),
        None => new_path.to_owned(),
    };

    *request.uri_mut() = transport.build_uri(target, &path_and_query);
    request
        .headers_mut()
        .insert(http::header::HOST, "localhost".parse().unwrap());

    transport.send(request).await
}

/// The UDS filename assigned to a given slot under `base_dir`.
pub fn socket_path(base_dir: &Path, slot: usize) -> std::path::PathBuf {
    base_dir.join(format!("slab-runner-{slot}.sock"))
}
