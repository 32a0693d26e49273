//! Rate-limit key functions
//!
//! A key function maps a request to the bucket it is charged against. A
//! request without the information a key function looks for gets the empty
//! key, so all such requests share one bucket.

use http::HeaderName;
use sluice_core::{Error, Result};
use sluice_router::GatewayRequest;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Maps a request to a rate-limit key
pub trait KeyFunction: Send + Sync + fmt::Debug {
    /// Name the key function was registered under
    fn name(&self) -> &str;

    /// Bucket key for the request
    fn key(&self, req: &GatewayRequest) -> String;
}

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Client IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer address
#[derive(Debug, Clone, Copy, Default)]
pub struct IpKey;

impl IpKey {
    /// Resolve the client address of a request
    pub fn client_ip(req: &GatewayRequest) -> Option<IpAddr> {
        // Try X-Forwarded-For header first (behind proxy)
        if let Some(forwarded) = req.headers.get(X_FORWARDED_FOR) {
            if let Ok(forwarded_str) = forwarded.to_str() {
                if let Some(first_ip) = forwarded_str.split(',').next() {
                    if let Ok(ip) = first_ip.trim().parse() {
                        return Some(ip);
                    }
                }
            }
        }

        // Try X-Real-IP header
        if let Some(real_ip) = req.headers.get(X_REAL_IP) {
            if let Ok(ip) = real_ip.to_str().map(str::trim).unwrap_or_default().parse() {
                return Some(ip);
            }
        }

        req.remote_addr.map(|addr| addr.ip())
    }
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) if v6.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    }
}

impl KeyFunction for IpKey {
    fn name(&self) -> &str {
        "ip"
    }

    fn key(&self, req: &GatewayRequest) -> String {
        Self::client_ip(req)
            .map(|ip| normalize(ip).to_string())
            .unwrap_or_default()
    }
}

/// Request path
#[derive(Debug, Clone, Copy, Default)]
pub struct PathKey;

impl KeyFunction for PathKey {
    fn name(&self) -> &str {
        "path"
    }

    fn key(&self, req: &GatewayRequest) -> String {
        req.url.path().to_string()
    }
}

/// Request path followed by the method, e.g. `/users:GET`
#[derive(Debug, Clone, Copy, Default)]
pub struct PathMethodKey;

impl KeyFunction for PathMethodKey {
    fn name(&self) -> &str {
        "path-method"
    }

    fn key(&self, req: &GatewayRequest) -> String {
        format!("{}:{}", req.url.path(), req.method)
    }
}

/// First value of a header
#[derive(Debug, Clone)]
pub struct HeaderKey {
    header: HeaderName,
}

impl HeaderKey {
    /// Key on `name`
    pub fn new(name: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::invalid("name", "a valid header name"))?;
        Ok(Self { header })
    }
}

impl KeyFunction for HeaderKey {
    fn name(&self) -> &str {
        "header"
    }

    fn key(&self, req: &GatewayRequest) -> String {
        req.headers
            .get(&self.header)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default()
    }
}

/// First value of a query parameter
#[derive(Debug, Clone)]
pub struct QueryKey {
    param: String,
}

impl QueryKey {
    /// Key on `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { param: name.into() }
    }
}

impl KeyFunction for QueryKey {
    fn name(&self) -> &str {
        "query"
    }

    fn key(&self, req: &GatewayRequest) -> String {
        req.url
            .query_pairs()
            .find(|(key, _)| *key == self.param)
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Method};
    use std::net::SocketAddr;
    use url::Url;

    fn request(url: &str) -> GatewayRequest {
        GatewayRequest::new(Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn test_ip_precedence() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut req = request("http://gw/").with_remote_addr(peer);
        assert_eq!(IpKey.key(&req), "10.0.0.9");

        req.headers.insert(X_REAL_IP, HeaderValue::from_static("192.168.1.7"));
        assert_eq!(IpKey.key(&req), "192.168.1.7");

        req.headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(IpKey.key(&req), "203.0.113.5");
    }

    #[test]
    fn test_ipv6_loopback_normalized() {
        let peer: SocketAddr = "[::1]:8080".parse().unwrap();
        let req = request("http://gw/").with_remote_addr(peer);
        assert_eq!(IpKey.key(&req), "127.0.0.1");
    }

    #[test]
    fn test_invalid_forwarded_for_falls_back() {
        let peer: SocketAddr = "10.1.1.1:1".parse().unwrap();
        let mut req = request("http://gw/").with_remote_addr(peer);
        req.headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("unknown"));
        assert_eq!(IpKey.key(&req), "10.1.1.1");
    }

    #[test]
    fn test_missing_values_give_empty_key() {
        let req = request("http://gw/items");
        assert_eq!(IpKey.key(&req), "");
        assert_eq!(HeaderKey::new("x-api-key").unwrap().key(&req), "");
        assert_eq!(QueryKey::new("tenant").key(&req), "");
    }

    #[test]
    fn test_path_based_keys() {
        let req = request("http://gw/items/3?tenant=acme");
        assert_eq!(PathKey.key(&req), "/items/3");
        assert_eq!(PathMethodKey.key(&req), "/items/3:GET");
        assert_eq!(QueryKey::new("tenant").key(&req), "acme");
    }
}
