//! Client IP resolution behind Cloudflare and Fly.io.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, request::Parts};

/// Proxy headers carrying the client address, most trusted first.
const IP_HEADERS: [&str; 4] = [
    "cf-connecting-ip",
    "x-forwarded-for",
    "x-real-ip",
    "fly-client-ip",
];

/// Used when no address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// The caller's IP address as a string, or [`UNKNOWN_IP`].
///
/// Checks `CF-Connecting-IP`, the first `X-Forwarded-For` entry, `X-Real-IP`
/// and `Fly-Client-IP`, then the socket peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ip) = ip_from_headers(&parts.headers) {
            return Ok(Self(ip.to_string()));
        }

        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map_or_else(|| UNKNOWN_IP.to_string(), |info| info.0.ip().to_string());
        Ok(Self(ip))
    }
}

fn ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    IP_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    })
}
