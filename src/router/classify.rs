//! Request classification.

use crate::http::Request;

/// Which strategy handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Page load: network, then cached shell, then offline page
  Navigation,
  /// Mutating call to the resource endpoint: network only, JSON 503 when offline
  EndpointWrite,
  /// Read of the resource endpoint: network, then API store, then `[]`
  EndpointRead,
  /// Any other read: network, then any store, then plain-text notice
  GenericRead,
  /// Any other verb outside the endpoint: network only
  Passthrough,
}

/// Pick the strategy for `request`. Navigation wins over everything else;
/// the endpoint is matched as a substring of the full URL.
pub fn classify(request: &Request, endpoint_path: &str) -> Route {
  if request.is_navigation() {
    return Route::Navigation;
  }

  let targets_endpoint = request.url.as_str().contains(endpoint_path);
  match (targets_endpoint, request.method) {
    (true, m) if m.is_write() => Route::EndpointWrite,
    (true, m) if m.is_read() => Route::EndpointRead,
    (_, m) if m.is_read() => Route::GenericRead,
    _ => Route::Passthrough,
  }
}
