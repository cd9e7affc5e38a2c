//! Public suffix checks for the cookie Domain attribute.

use psl::{List, Psl};

/// True when `domain` is itself a public suffix, e.g. `com` or `co.uk`.
pub fn is_public_suffix(domain: &str) -> bool {
    let lower = domain.to_ascii_lowercase();
    List.suffix(lower.as_bytes())
        .is_some_and(|suffix| suffix.as_bytes() == lower.as_bytes())
}

/// eTLD+1 for `domain`, `None` for a bare public suffix.
pub fn registrable_domain(domain: &str) -> Option<String> {
    let lower = domain.to_ascii_lowercase();
    psl::domain(lower.as_bytes())
        .and_then(|d| std::str::from_utf8(d.as_bytes()).ok())
        .map(str::to_string)
}

/// A Domain attribute is accepted when it is not a public suffix and the
/// request host equals it or is a subdomain of it.
pub fn is_valid_cookie_domain(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
    if domain.is_empty() || is_public_suffix(&domain) {
        return false;
    }
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}
