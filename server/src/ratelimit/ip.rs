//! Client IP extraction and normalization.
//!
//! Shared by the rate limiter and the activity log.

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Leading IPv6 segments kept when keying a client (its /64).
const IPV6_PREFIX_SEGMENTS: usize = 4;

/// First parseable address from `X-Forwarded-For`, then `X-Real-IP`.
fn proxied_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header("X-Forwarded-For")
        .and_then(|chain| chain.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| header("X-Real-IP").and_then(|v| v.trim().parse().ok()))
}

/// Extract the client IP.
///
/// Proxy headers are honored only when `trust_proxy` is set. Falls back to
/// the socket peer, then 127.0.0.1.
pub fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> IpAddr {
    trust_proxy
        .then(|| proxied_ip(headers))
        .flatten()
        .or_else(|| connect_info.map(|c| c.0.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Normalize an IP for use as a limiter key.
///
/// IPv6 collapses to its /64 so one allocation shares a budget.
pub fn normalize_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let prefix: Vec<String> = v6.segments()[..IPV6_PREFIX_SEGMENTS]
                .iter()
                .map(|s| format!("{s:x}"))
                .collect();
            format!("{}::/64", prefix.join(":"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 12345))
    }

    #[test]
    fn ipv4_is_kept() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(normalize_ip(ip), "192.168.1.100");
    }

    #[test]
    fn ipv6_collapses_to_prefix() {
        let ip = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0x85a3, 0x1234, 0, 0, 0, 1));
        assert_eq!(normalize_ip(ip), "2001:db8:85a3:1234::/64");
    }

    #[test]
    fn forwarded_for_needs_trust() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.50, 70.41.3.18".parse().unwrap());

        assert_eq!(
            extract_client_ip(&headers, Some(&peer()), true),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 50))
        );
        assert_eq!(
            extract_client_ip(&headers, Some(&peer()), false),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
        );
    }

    #[test]
    fn real_ip_is_second_choice() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "198.51.100.25".parse().unwrap());
        assert_eq!(
            extract_client_ip(&headers, Some(&peer()), true),
            IpAddr::V4(Ipv4Addr::new(198, 51, 100, 25))
        );

        headers.insert("X-Forwarded-For", "203.0.113.50".parse().unwrap());
        assert_eq!(
            extract_client_ip(&headers, Some(&peer()), true),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 50))
        );
    }

    #[test]
    fn unparseable_header_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "not-an-ip".parse().unwrap());

        assert_eq!(
            extract_client_ip(&headers, Some(&peer()), true),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
        );
    }

    #[test]
    fn no_peer_means_localhost() {
        assert_eq!(
            extract_client_ip(&HeaderMap::new(), None, false),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }
}
