//! Responses synthesized when neither the network nor a store can answer.

use crate::http::Response;

pub const OFFLINE_SHELL_HTML: &str =
  "<h1>Offline</h1><p>The app is offline and no cached shell is available.</p>";

pub const OFFLINE_RESOURCE_TEXT: &str = "Offline and no cached resource";

/// Offline page for a navigation with no cached shell.
pub fn offline_shell() -> Response {
  Response::new(200, "text/html", OFFLINE_SHELL_HTML)
}

/// Failed write to the resource endpoint.
pub fn offline_write(notice: &str) -> Response {
  let body = serde_json::json!({ "error": notice }).to_string();
  Response::new(503, "application/json", body)
}

/// Endpoint read with nothing cached. Always a parseable empty array.
pub fn empty_list() -> Response {
  Response::new(200, "application/json", "[]")
}

/// Any other read with nothing cached.
pub fn unavailable() -> Response {
  Response::new(200, "text/plain", OFFLINE_RESOURCE_TEXT)
}

/// Non-read request outside the endpoint that could not reach the network.
pub fn service_unavailable() -> Response {
  Response::new(503, "text/plain", OFFLINE_RESOURCE_TEXT)
}
