//! Proxy bypass filter.
//!
//! Decides whether a target host should skip the configured proxy. The rule
//! set is parsed once from a bypass string and replaced wholesale on
//! reconfiguration; see [`SharedProxyFilter`].

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use url::Url;

/// One parsed bypass rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassRule {
    /// Literal host name, matched case-insensitively.
    Exact(String),
    /// `.example.com`: the domain itself and every host under it.
    Suffix(String),
    /// Literal IP address.
    Ip(IpAddr),
    /// Address plus prefix length; low bits outside the prefix are ignored.
    IpMask(IpAddr, u8),
}

/// Proxy bypass rules.
///
/// Bypass string format: entries separated by `,`, `;` or whitespace:
/// - `example.com` exact host
/// - `.example.com` domain suffix
/// - `192.168.1.1`, `::1` literal address
/// - `10.0.0.0/8`, `10.0.0.0/255.0.0.0` address with mask
/// - `*` every host
///
/// Loopback hosts (`127.0.0.1`, `::1`, `localhost`) always bypass.
/// Entries that do not parse are dropped.
#[derive(Debug, Clone, Default)]
pub struct ProxyFilter {
    rules: Vec<BypassRule>,
    match_all: bool,
}

impl ProxyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a bypass string.
    pub fn parse(bypass: &str) -> Self {
        let mut filter = ProxyFilter::default();

        for entry in bypass
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            if entry == "*" {
                filter.match_all = true;
                continue;
            }

            match parse_rule(entry) {
                Some(rule) => filter.rules.push(rule),
                None => tracing::debug!(entry, "dropping malformed proxy bypass entry"),
            }
        }

        filter
    }

    pub fn rules(&self) -> &[BypassRule] {
        &self.rules
    }

    /// Check if a host should bypass the proxy.
    pub fn should_bypass(&self, host: &str) -> bool {
        let host = host.trim_start_matches('[').trim_end_matches(']');

        if is_loopback_host(host) || self.match_all {
            return true;
        }

        if let Ok(addr) = host.parse::<IpAddr>() {
            return self.rules.iter().any(|rule| match rule {
                BypassRule::Ip(ip) => *ip == addr,
                BypassRule::IpMask(net, prefix) => mask_matches(*net, *prefix, addr),
                _ => false,
            });
        }

        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.rules.iter().any(|rule| match rule {
            BypassRule::Exact(name) => *name == host,
            BypassRule::Suffix(domain) => {
                host == *domain
                    || (host.len() > domain.len()
                        && host.ends_with(domain.as_str())
                        && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
            }
            _ => false,
        })
    }

    /// Check if a URL's host should bypass the proxy.
    pub fn should_bypass_url(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|h| self.should_bypass(h))
    }
}

fn is_loopback_host(host: &str) -> bool {
    host == "127.0.0.1" || host == "::1" || host.eq_ignore_ascii_case("localhost")
}

fn parse_rule(entry: &str) -> Option<BypassRule> {
    if let Some((addr, mask)) = entry.split_once('/') {
        let addr = addr.parse::<IpAddr>().ok()?;
        let prefix = parse_mask(addr, mask)?;
        return Some(BypassRule::IpMask(addr, prefix));
    }

    let bare = entry.trim_start_matches('[').trim_end_matches(']');
    if let Ok(addr) = bare.parse::<IpAddr>() {
        return Some(BypassRule::Ip(addr));
    }

    let (suffix, name) = match entry.strip_prefix('.') {
        Some(rest) => (true, rest),
        None => (false, entry),
    };
    let name = name.trim_end_matches('.').to_ascii_lowercase();

    if !is_valid_hostname(&name) {
        return None;
    }

    Some(if suffix {
        BypassRule::Suffix(name)
    } else {
        BypassRule::Exact(name)
    })
}

/// Accepts a prefix length (`24`) or, for IPv4, a dotted mask (`255.255.255.0`).
fn parse_mask(addr: IpAddr, mask: &str) -> Option<u8> {
    let max = if addr.is_ipv4() { 32 } else { 128 };

    if let Ok(prefix) = mask.parse::<u8>() {
        return (prefix <= max).then_some(prefix);
    }

    match (addr, mask.parse::<IpAddr>().ok()?) {
        (IpAddr::V4(_), IpAddr::V4(m)) => {
            let bits = u32::from(m);
            let prefix = bits.leading_ones();
            // Reject non-contiguous masks like 255.0.255.0.
            (bits.count_ones() == prefix).then_some(prefix as u8)
        }
        _ => None,
    }
}

fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|label| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}

/// Zero the bits excluded by `prefix` on both sides and compare.
fn mask_matches(network: IpAddr, prefix: u8, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = if prefix == 0 {
                0u32
            } else {
                !0u32 << (32 - u32::from(prefix.min(32)))
            };
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = if prefix == 0 {
                0u128
            } else {
                !0u128 << (128 - u32::from(prefix.min(128)))
            };
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

/// A filter that readers consult while the owner swaps in a new rule set.
#[derive(Debug, Clone, Default)]
pub struct SharedProxyFilter {
    inner: Arc<RwLock<Arc<ProxyFilter>>>,
}

impl SharedProxyFilter {
    pub fn new(filter: ProxyFilter) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(filter))),
        }
    }

    /// Replace the whole rule set.
    pub fn replace(&self, filter: ProxyFilter) {
        let next = Arc::new(filter);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Current rule set.
    pub fn load(&self) -> Arc<ProxyFilter> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn should_bypass(&self, host: &str) -> bool {
        self.load().should_bypass(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard() {
        let f = ProxyFilter::parse("*");
        assert!(f.should_bypass("anything.com"));
        assert!(f.should_bypass("192.168.1.1"));
    }

    #[test]
    fn test_loopback_always_bypasses() {
        let f = ProxyFilter::new();
        assert!(f.should_bypass("127.0.0.1"));
        assert!(f.should_bypass("[::1]"));
        assert!(f.should_bypass("LocalHost"));
        assert!(!f.should_bypass("example.com"));
    }

    #[test]
    fn test_exact_domain() {
        let f = ProxyFilter::parse("example.com");
        assert!(f.should_bypass("example.com"));
        assert!(f.should_bypass("EXAMPLE.COM"));
        assert!(!f.should_bypass("www.example.com"));
        assert!(!f.should_bypass("notexample.com"));
    }

    #[test]
    fn test_suffix_domain() {
        let f = ProxyFilter::parse(".example.com");
        assert!(f.should_bypass("example.com"));
        assert!(f.should_bypass("www.example.com"));
        assert!(f.should_bypass("sub.www.example.com"));
        assert!(!f.should_bypass("notexample.com"));
    }

    #[test]
    fn test_ip_exact() {
        let f = ProxyFilter::parse("192.168.1.1; 10.0.0.5");
        assert!(f.should_bypass("192.168.1.1"));
        assert!(f.should_bypass("10.0.0.5"));
        assert!(!f.should_bypass("192.168.1.2"));
    }

    #[test]
    fn test_ip_mask() {
        let f = ProxyFilter::parse("192.168.1.0/24 172.16.0.0/255.240.0.0");
        assert!(f.should_bypass("192.168.1.1"));
        assert!(f.should_bypass("192.168.1.254"));
        assert!(!f.should_bypass("192.168.2.1"));
        assert!(f.should_bypass("172.31.255.1"));
        assert!(!f.should_bypass("172.32.0.1"));
    }

    #[test]
    fn test_ipv6_mask() {
        let f = ProxyFilter::parse("2001:db8::/32");
        assert!(f.should_bypass("2001:db8::1"));
        assert!(f.should_bypass("[2001:db8:ffff::1]"));
        assert!(!f.should_bypass("2001:db9::1"));
    }

    #[test]
    fn test_malformed_entries_dropped() {
        let f = ProxyFilter::parse("bad!host, ., 10.0.0.0/33, 1.2.3.4/255.0.255.0, ok.com");
        assert_eq!(f.rules(), &[BypassRule::Exact("ok.com".into())]);
    }

    #[test]
    fn test_url_bypass() {
        let f = ProxyFilter::parse(".internal.company.com");
        let url = Url::parse("https://api.internal.company.com/v1").unwrap();
        assert!(f.should_bypass_url(&url));
        let url = Url::parse("https://external.com/").unwrap();
        assert!(!f.should_bypass_url(&url));
    }

    #[test]
    fn test_shared_replace() {
        let shared = SharedProxyFilter::new(ProxyFilter::parse("a.com"));
        let snapshot = shared.load();
        shared.replace(ProxyFilter::parse("b.com"));

        assert!(snapshot.should_bypass("a.com"));
        assert!(!shared.should_bypass("a.com"));
        assert!(shared.should_bypass("b.com"));
    }
}
