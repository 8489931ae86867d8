//! Upstream endpoint handling.
//!
//! The configured endpoint may be the service root (`https://host`) or the
//! query route itself (`https://host/query`), which is how deployments of the
//! agent service are usually advertised. Both resolve to the same routes.

const KNOWN_ROUTES: &[&str] = &["query", "health"];

/// Strips trailing slashes and a trailing known route segment.
///
/// ```
/// use justify::utils::url::service_root;
///
/// assert_eq!(service_root("https://auditor.example/query"), "https://auditor.example");
/// assert_eq!(service_root("https://auditor.example/api/"), "https://auditor.example/api");
/// ```
pub fn service_root(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    for route in KNOWN_ROUTES {
        if let Some(root) = trimmed.strip_suffix(route) {
            if root.ends_with('/') {
                return root.trim_end_matches('/').to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Joins a route onto the service root without doubling slashes.
///
/// ```
/// use justify::utils::url::route_url;
///
/// assert_eq!(route_url("http://127.0.0.1:8000/", "/health"), "http://127.0.0.1:8000/health");
/// ```
pub fn route_url(endpoint: &str, route: &str) -> String {
    format!(
        "{}/{}",
        service_root(endpoint),
        route.trim_start_matches('/')
    )
}
