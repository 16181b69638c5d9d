//! Client identity used to key per-client rate limits.
//!
//! The identity is the peer's IP address. Forwarding headers are only believed
//! when the peer itself is a trusted proxy, otherwise any client could pick
//! its own bucket by sending `X-Forwarded-For`.

use std::net::{IpAddr, SocketAddr};

use hyper::http::HeaderMap;

use crate::Error;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Resolves the client identity of a request.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    trusted: Vec<IpAddr>,
}

impl Resolver {
    /// Build a resolver trusting forwarding headers from `trusted_proxies`.
    pub fn new(trusted_proxies: &[String]) -> crate::Result<Self> {
        let trusted = trusted_proxies
            .iter()
            .map(|p| {
                p.parse::<IpAddr>()
                    .map(|ip| ip.to_canonical())
                    .map_err(|_| Error::Config(format!("Invalid trusted proxy address: {p}")))
            })
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self { trusted })
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted.contains(ip)
    }

    /// Identity of the client behind `peer`.
    ///
    /// With a trusted peer, `X-Forwarded-For` is walked from the right,
    /// skipping further trusted hops; the first untrusted address wins. If
    /// that yields nothing, `X-Real-IP` is tried, then the peer address.
    pub fn resolve(&self, peer: SocketAddr, headers: &HeaderMap) -> String {
        let peer_ip = peer.ip().to_canonical();
        if !self.is_trusted(&peer_ip) {
            return peer_ip.to_string();
        }

        let forwarded: Vec<IpAddr> = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
            .map(|ip| ip.to_canonical())
            .collect();

        if let Some(client) = forwarded.iter().rev().find(|ip| !self.is_trusted(ip)) {
            return client.to_string();
        }
        if let Some(first) = forwarded.first() {
            return first.to_string();
        }

        headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
            .map(|ip| ip.to_canonical())
            .unwrap_or(peer_ip)
            .to_string()
    }
}
