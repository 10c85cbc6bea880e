//! Service-origin resolution for rate-limit keying.
//!
//! Machine-to-machine callers (git bridge, CI runners, internal services)
//! funnel many end users through a few addresses, so limiting them by raw
//! IP would starve legitimate traffic. Instead each request resolves to a
//! *service origin* — a stable caller identity — and the rate key is built
//! from that.
//!
//! Resolution precedence:
//!
//! 1. the trusted origin header, when configured on
//! 2. the mTLS client certificate common name
//! 3. `ip:<remote address>` as a last resort
//!
//! A request with none of the three resolves to no origin and is bucketed
//! under a shared `unknown` key, so unidentifiable callers collectively
//! compete for one budget instead of each minting a fresh one.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Header carrying the caller-declared origin, honored only from trusted
/// proxies.
pub const ORIGIN_HEADER: &str = "x-service-origin";

/// Transport-level facts about a request, captured at the HTTP edge.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Value of the origin header, if present.
    pub origin_header: Option<String>,
    /// Common name from the verified mTLS client certificate, if any.
    pub client_cert_cn: Option<String>,
    /// Caller address for the `ip:` fallback identity. May come from a
    /// forwarded-for chain and is therefore client-influenced; never used
    /// for trust decisions.
    pub remote_addr: Option<IpAddr>,
    /// The raw socket peer. This is the only address the proxy allowlist
    /// is checked against, because forwarded headers are writable by the
    /// caller.
    pub peer_addr: Option<IpAddr>,
}

/// Origin-resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Whether the origin header is honored at all.
    pub trust_origin_header: bool,
    /// Proxies allowed to set the origin header. Empty means any peer may
    /// set it (suitable only behind a controlled ingress).
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self { trust_origin_header: false, trusted_proxies: Vec::new() }
    }
}

impl OriginConfig {
    fn header_trusted_from(&self, peer_addr: Option<IpAddr>) -> bool {
        if !self.trust_origin_header {
            return false;
        }
        if self.trusted_proxies.is_empty() {
            return true;
        }
        peer_addr.is_some_and(|addr| self.trusted_proxies.contains(&addr))
    }
}

/// Resolves the service origin for a request, or `None` when nothing
/// identifies the caller.
pub fn service_origin(meta: &RequestMeta, config: &OriginConfig) -> Option<String> {
    if config.header_trusted_from(meta.peer_addr) {
        if let Some(header) = meta.origin_header.as_deref() {
            let header = header.trim();
            if !header.is_empty() {
                trace!(origin = header, "resolved origin from trusted header");
                return Some(header.to_string());
            }
        }
    }

    if let Some(cn) = meta.client_cert_cn.as_deref() {
        let cn = cn.trim();
        if !cn.is_empty() {
            trace!(origin = cn, "resolved origin from client certificate");
            return Some(cn.to_string());
        }
    }

    meta.remote_addr.map(|addr| format!("ip:{addr}"))
}

/// Builds the rate-limit key for a resolved origin. Unidentifiable callers
/// share the `unknown` bucket.
pub fn origin_rate_key(origin: Option<&str>) -> String {
    match origin {
        Some(origin) => format!("service-origin:{origin}"),
        None => "service-origin:unknown".to_string(),
    }
}

/// Maps an IPv4 address (optionally in `ip:` key form) to its /24 subnet
/// key. IPv6 and non-address keys get no subnet aggregation.
pub fn subnet_key(key: &str) -> Option<String> {
    let addr = key.strip_prefix("ip:").unwrap_or(key);
    match addr.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            Some(format!("subnet:{}.{}.{}", octets[0], octets[1], octets[2]))
        }
        IpAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(header: Option<&str>, cn: Option<&str>, addr: Option<&str>) -> RequestMeta {
        // Direct connection: peer and caller address coincide.
        RequestMeta {
            origin_header: header.map(str::to_string),
            client_cert_cn: cn.map(str::to_string),
            remote_addr: addr.map(|a| a.parse().unwrap()),
            peer_addr: addr.map(|a| a.parse().unwrap()),
        }
    }

    #[test]
    fn header_wins_when_trusted() {
        let config = OriginConfig { trust_origin_header: true, trusted_proxies: vec![] };
        let meta = meta(Some("git-bridge"), Some("ci.internal"), Some("10.0.0.1"));
        assert_eq!(service_origin(&meta, &config).as_deref(), Some("git-bridge"));
    }

    #[test]
    fn header_ignored_when_disabled() {
        let config = OriginConfig::default();
        let meta = meta(Some("spoofed"), Some("ci.internal"), Some("10.0.0.1"));
        assert_eq!(service_origin(&meta, &config).as_deref(), Some("ci.internal"));
    }

    #[test]
    fn header_ignored_from_untrusted_proxy() {
        let config = OriginConfig {
            trust_origin_header: true,
            trusted_proxies: vec!["192.168.1.1".parse().unwrap()],
        };
        let meta = meta(Some("spoofed"), None, Some("10.0.0.1"));
        assert_eq!(service_origin(&meta, &config).as_deref(), Some("ip:10.0.0.1"));
    }

    #[test]
    fn forwarded_address_cannot_satisfy_the_proxy_allowlist() {
        let config = OriginConfig {
            trust_origin_header: true,
            trusted_proxies: vec!["192.168.1.1".parse().unwrap()],
        };
        // An untrusted peer forwards a chain whose first hop names the
        // trusted proxy. The gate must look at the socket, not the chain.
        let meta = RequestMeta {
            origin_header: Some("spoofed".to_string()),
            client_cert_cn: None,
            remote_addr: Some("192.168.1.1".parse().unwrap()),
            peer_addr: Some("10.0.0.1".parse().unwrap()),
        };
        assert_eq!(service_origin(&meta, &config).as_deref(), Some("ip:192.168.1.1"));
    }

    #[test]
    fn falls_back_to_cert_then_ip_then_none() {
        let config = OriginConfig { trust_origin_header: true, trusted_proxies: vec![] };

        let cert_only = meta(None, Some("ci.internal"), Some("10.0.0.1"));
        assert_eq!(service_origin(&cert_only, &config).as_deref(), Some("ci.internal"));

        let ip_only = meta(None, None, Some("10.0.0.1"));
        assert_eq!(service_origin(&ip_only, &config).as_deref(), Some("ip:10.0.0.1"));

        let nothing = meta(None, None, None);
        assert_eq!(service_origin(&nothing, &config), None);
    }

    #[test]
    fn empty_header_and_cn_are_not_origins() {
        let config = OriginConfig { trust_origin_header: true, trusted_proxies: vec![] };
        let meta = meta(Some("   "), Some(""), Some("10.0.0.1"));
        assert_eq!(service_origin(&meta, &config).as_deref(), Some("ip:10.0.0.1"));
    }

    #[test]
    fn unknown_callers_share_one_rate_key() {
        assert_eq!(origin_rate_key(Some("git-bridge")), "service-origin:git-bridge");
        assert_eq!(origin_rate_key(None), "service-origin:unknown");
    }

    #[test]
    fn subnet_keys_group_by_first_three_octets() {
        assert_eq!(subnet_key("10.0.0.7").as_deref(), Some("subnet:10.0.0"));
        assert_eq!(subnet_key("ip:10.0.0.200").as_deref(), Some("subnet:10.0.0"));
        assert_eq!(subnet_key("::1"), None);
        assert_eq!(subnet_key("service-origin:git-bridge"), None);
    }
}
