//! Local intercepting proxy: every request received is resolved against the
//! upstream origin and answered by the cache router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::fetch::Fetcher;
use crate::http::{origin_url, Method, Request, RequestMode, Response};
use crate::router::CacheRouter;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Derive the request mode from `Sec-Fetch-Mode`. Clients that do not send
/// it are treated as navigating when a GET prefers HTML.
pub fn request_mode(method: Method, headers: &HeaderMap) -> RequestMode {
  if let Some(mode) = headers
    .get("sec-fetch-mode")
    .and_then(|v| v.to_str().ok())
    .and_then(RequestMode::from_fetch_mode)
  {
    return mode;
  }

  let wants_html = headers
    .get(header::ACCEPT)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|accept| accept.contains("text/html"));

  if method == Method::Get && wants_html {
    RequestMode::Navigate
  } else {
    RequestMode::default()
  }
}

/// Convert an incoming proxy request into a router request.
pub async fn to_request(origin: &Url, request: axum::extract::Request) -> Result<Request> {
  let (parts, body) = request.into_parts();

  let method: Method = parts.method.as_str().parse()?;
  let path = parts
    .uri
    .path_and_query()
    .map(|pq| pq.as_str())
    .unwrap_or("/");
  let url = origin_url(origin, path);

  let headers = parts
    .headers
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
    .await
    .map_err(|e| eyre!("Failed to read request body: {}", e))?;

  Ok(Request {
    method,
    mode: request_mode(method, &parts.headers),
    url,
    headers,
    body: (!body.is_empty()).then(|| body.to_vec()),
  })
}

fn into_axum(response: Response) -> axum::response::Response {
  let mut builder = axum::http::Response::builder().status(response.status);
  for (name, value) in &response.headers {
    builder = builder.header(name.as_str(), value.as_str());
  }

  builder.body(Body::from(response.body)).unwrap_or_else(|e| {
    warn!(error = %e, "invalid response from router");
    StatusCode::BAD_GATEWAY.into_response()
  })
}

async fn forward<F, S>(
  State(router): State<Arc<CacheRouter<F, S>>>,
  request: axum::extract::Request,
) -> axum::response::Response
where
  F: Fetcher + 'static,
  S: CacheStorage + 'static,
{
  match to_request(&router.config().origin, request).await {
    Ok(request) => into_axum(router.handle(&request).await),
    Err(e) => {
      warn!(error = %e, "rejected request");
      (StatusCode::BAD_REQUEST, e.to_string()).into_response()
    }
  }
}

pub fn app<F, S>(router: Arc<CacheRouter<F, S>>) -> Router
where
  F: Fetcher + 'static,
  S: CacheStorage + 'static,
{
  Router::new().fallback(forward::<F, S>).with_state(router)
}

/// Serve until the process is stopped. The router must already be active.
pub async fn serve<F, S>(router: Arc<CacheRouter<F, S>>, addr: SocketAddr) -> Result<()>
where
  F: Fetcher + 'static,
  S: CacheStorage + 'static,
{
  let upstream = router.config().origin.clone();
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;

  info!(%addr, %upstream, "proxy listening");
  axum::serve(listener, app(router))
    .await
    .map_err(|e| eyre!("Proxy server error: {}", e))?;

  Ok(())
}
