use std::net::IpAddr;

use crate::request::strip_port;

/// True when `host` is a bare IPv4/IPv6 literal, optionally carrying a scheme,
/// port or trailing path. Such hosts have no `_redirect` zone to query.
pub fn is_ip_literal(host: &str) -> bool {
    let host = host.trim();
    let host = host
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(host);
    let host = host.split(['/', '?']).next().unwrap_or(host);

    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    strip_port(host).parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_are_not_literals() {
        assert!(!is_ip_literal("https://example.test"));
        assert!(!is_ip_literal("http://example.test"));
        assert!(!is_ip_literal("http://192.168.test.subdomain.test"));
        assert!(!is_ip_literal("example.test:8080"));
    }

    #[test]
    fn ipv4_literals_with_scheme_and_port() {
        assert!(is_ip_literal("192.168.1.1"));
        assert!(is_ip_literal("https://122.221.122.221"));
        assert!(is_ip_literal("127.0.0.1:8080"));
        assert!(is_ip_literal("https://127.0.0.1/test"));
    }

    #[test]
    fn ipv6_literals_in_every_shape() {
        assert!(is_ip_literal("FE80:0000:0000:0000:0202:B3FF:FE1E:8329"));
        assert!(is_ip_literal("FE80::0202:B3FF:FE1E:8329"));
        assert!(is_ip_literal("[2001:db8::1]:443"));
        assert!(is_ip_literal("https://2001:db8:1234::/48"));
    }
}
