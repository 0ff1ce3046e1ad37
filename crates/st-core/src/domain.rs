//! Domain resolution for page URLs.

use url::Url;

/// Resolves the accounting domain for a page URL.
///
/// Returns the lower-cased host, or `None` when the URL cannot be parsed or
/// has no host (e.g. `about:blank`, `data:` URLs).
pub fn resolve_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}
