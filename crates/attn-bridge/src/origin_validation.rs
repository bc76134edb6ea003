//! WebSocket Origin header validation (§6: "Origin checking accepts local
//! origins only"). WebSocket connections aren't subject to CORS, so the
//! Origin header is the only signal the server gets to refuse a connection
//! opened from an arbitrary webpage.

use axum::http::{HeaderMap, StatusCode};

const LOCAL_ORIGINS: &[&str] = &[
    "http://localhost",
    "https://localhost",
    "http://127.0.0.1",
    "https://127.0.0.1",
    "http://[::1]",
    "https://[::1]",
];

/// Rejects the upgrade unless the `Origin` header names one of the local
/// origins, with or without a port suffix.
pub fn validate_local_origin(headers: &HeaderMap) -> Result<(), StatusCode> {
    let origin = headers
        .get("origin")
        .ok_or(StatusCode::FORBIDDEN)?
        .to_str()
        .map_err(|_| StatusCode::FORBIDDEN)?;

    let is_allowed = LOCAL_ORIGINS.iter().any(|allowed| {
        if origin == *allowed {
            return true;
        }
        origin
            .strip_prefix(allowed)
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some_and(|port| port.chars().all(|c| c.is_ascii_digit()))
    });

    if is_allowed {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_origin(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("origin", origin.parse().unwrap());
        headers
    }

    #[test]
    fn localhost_without_port_is_accepted() {
        assert!(validate_local_origin(&headers_with_origin("http://localhost")).is_ok());
    }

    #[test]
    fn localhost_with_port_is_accepted() {
        assert!(validate_local_origin(&headers_with_origin("http://localhost:9849")).is_ok());
    }

    #[test]
    fn loopback_ipv4_and_ipv6_are_accepted() {
        assert!(validate_local_origin(&headers_with_origin("http://127.0.0.1:9849")).is_ok());
        assert!(validate_local_origin(&headers_with_origin("http://[::1]:9849")).is_ok());
    }

    #[test]
    fn remote_origin_is_rejected() {
        assert!(validate_local_origin(&headers_with_origin("https://evil.example")).is_err());
    }

    #[test]
    fn subdomain_of_localhost_is_rejected() {
        assert!(validate_local_origin(&headers_with_origin("http://attacker.localhost")).is_err());
    }

    #[test]
    fn missing_origin_header_is_rejected() {
        assert!(validate_local_origin(&HeaderMap::new()).is_err());
    }

    #[test]
    fn non_numeric_port_suffix_is_rejected() {
        assert!(validate_local_origin(&headers_with_origin("http://localhost:abc")).is_err());
    }
}
