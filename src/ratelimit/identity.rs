//! Client identity resolution.
//!
//! The HTTP layer hands this module a peer address and an optional API key;
//! everything downstream works with the opaque identifier strings produced
//! here.

use std::net::IpAddr;

/// The resolved identity of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Peer address, if the transport exposed one.
    pub ip: Option<IpAddr>,
    /// API key presented with the request, if any.
    pub api_key: Option<String>,
}

impl ClientIdentity {
    /// Identity for a request carrying only a peer address.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            api_key: None,
        }
    }

    /// Identity carrying both a peer address and an API key.
    pub fn new(ip: Option<IpAddr>, api_key: Option<String>) -> Self {
        Self { ip, api_key }
    }

    /// Quota identifiers for this client, most specific first.
    ///
    /// An API key gets its own identifier so a key shares one quota across
    /// source addresses; the IP identifier is always present (`ip:unknown`
    /// when the transport gave us nothing) so anonymous traffic is still
    /// metered.
    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers = Vec::with_capacity(2);

        if let Some(key) = self.api_key.as_deref() {
            let key = key.trim();
            if !key.is_empty() {
                identifiers.push(format!("api_key:{key}"));
            }
        }

        match self.ip {
            Some(ip) => identifiers.push(format!("ip:{ip}")),
            None => identifiers.push("ip:unknown".to_string()),
        }

        identifiers
    }
}
