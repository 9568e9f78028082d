use axum::http::HeaderMap;
use std::net::SocketAddr;

fn is_loopback(addr: &SocketAddr) -> bool {
    addr.ip().is_loopback()
}

/// Client address for logging and rate limiting.
///
/// `X-Forwarded-For` is trusted only when the immediate peer is loopback
/// (i.e. a reverse proxy on this host); otherwise the socket address wins.
pub fn client_ip(immediate: &SocketAddr, headers: &HeaderMap) -> String {
    if is_loopback(immediate) {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return forwarded.to_string();
        }
    }
    immediate.ip().to_string()
}

/// Whether session cookies should carry `Secure`.
///
/// True when the request arrived over TLS, or when a loopback proxy asserts
/// `X-Forwarded-Proto: https`. The header is never trusted from a
/// non-loopback source.
pub fn request_is_secure(tls: bool, immediate: &SocketAddr, headers: &HeaderMap) -> bool {
    if tls {
        return true;
    }
    is_loopback(immediate)
        && headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("https"))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn forwarded_for_honored_only_from_loopback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));

        assert_eq!(client_ip(&addr("127.0.0.1:9000"), &headers), "203.0.113.7");
        assert_eq!(client_ip(&addr("198.51.100.2:9000"), &headers), "198.51.100.2");
        assert_eq!(client_ip(&addr("127.0.0.1:9000"), &HeaderMap::new()), "127.0.0.1");
    }

    #[test]
    fn secure_detection() {
        let mut https = HeaderMap::new();
        https.insert("x-forwarded-proto", HeaderValue::from_static("https"));

        assert!(request_is_secure(true, &addr("198.51.100.2:1"), &HeaderMap::new()));
        assert!(request_is_secure(false, &addr("127.0.0.1:1"), &https));
        assert!(!request_is_secure(false, &addr("198.51.100.2:1"), &https));
        assert!(!request_is_secure(false, &addr("127.0.0.1:1"), &HeaderMap::new()));
    }
}
