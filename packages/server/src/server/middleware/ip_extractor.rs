use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

/// Extension key for storing the resolved client address
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Resolve the client address, preferring proxy headers over the socket.
///
/// Priority: X-Forwarded-For (first entry), then X-Real-IP, then the
/// connecting socket.
fn resolve_client_ip(headers: &HeaderMap, socket: SocketAddr) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        return forwarded
            .to_str()
            .ok()
            .and_then(|list| list.split(',').next())
            .and_then(|first| first.trim().parse().ok());
    }
    if let Some(real_ip) = headers.get("x-real-ip") {
        return real_ip.to_str().ok().and_then(|s| s.trim().parse().ok());
    }
    Some(socket.ip())
}

/// Middleware to extract the client IP address from a request
pub async fn extract_client_ip(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(ip) = resolve_client_ip(request.headers(), addr) {
        request.extensions_mut().insert(ClientIp(ip));
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn socket() -> SocketAddr {
        "10.0.0.1:443".parse().unwrap()
    }

    #[test]
    fn forwarded_for_takes_priority() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.2"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));

        let ip = resolve_client_ip(&headers, socket());
        assert_eq!(ip, Some("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn real_ip_used_when_no_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));

        let ip = resolve_client_ip(&headers, socket());
        assert_eq!(ip, Some("198.51.100.4".parse().unwrap()));
    }

    #[test]
    fn socket_address_is_the_fallback() {
        let ip = resolve_client_ip(&HeaderMap::new(), socket());
        assert_eq!(ip, Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn garbage_forwarded_header_yields_none() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));

        assert_eq!(resolve_client_ip(&headers, socket()), None);
    }
}
