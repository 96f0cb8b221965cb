//! Shared types used across gatewatch crates.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Obfuscation tag of endpoints that can be probed directly.
pub const OBFUSCATION_NONE: &str = "none";

fn default_obfuscation() -> String {
    OBFUSCATION_NONE.to_string()
}

/// A gateway endpoint as published by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
    /// Transport tag: "tcp" | "udp". Unknown tags are kept and rejected at probe time.
    pub transport: String,
    #[serde(default = "default_obfuscation")]
    pub obfuscation: String,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16, transport: &str) -> Self {
        Self {
            ip,
            port,
            transport: transport.to_string(),
            obfuscation: default_obfuscation(),
        }
    }

    pub fn with_obfuscation(mut self, obfuscation: &str) -> Self {
        self.obfuscation = obfuscation.to_string();
        self
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Only unobfuscated endpoints are eligible for probing.
    pub fn is_eligible(&self) -> bool {
        self.obfuscation == OBFUSCATION_NONE
    }

    pub fn key(&self) -> String {
        measurement_key(&self.addr(), &self.transport)
    }
}

/// Credential material shared by all endpoints of a provider.
///
/// Each field is `base64:<payload>`; see [`crate::auth::decode_blob`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBundle {
    #[serde(default)]
    pub ca: String,
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

/// Outcome of probing one endpoint in one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub healthy: bool,
    pub addr: SocketAddr,
    pub transport: String,
    /// Unix timestamp (seconds) of when the probe started.
    pub timestamp: u64,
    /// Healthy now, unhealthy in the round before. Set when the batch is published.
    pub recovered: bool,
}

impl Measurement {
    pub fn new(addr: SocketAddr, transport: &str, healthy: bool) -> Self {
        Self {
            healthy,
            addr,
            transport: transport.to_string(),
            timestamp: epoch_secs(),
            recovered: false,
        }
    }

    pub fn key(&self) -> String {
        measurement_key(&self.addr, &self.transport)
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.transport)
    }
}

/// Lookup key for a measurement: `<addr>/<transport>`.
pub fn measurement_key(addr: &SocketAddr, transport: &str) -> String {
    format!("{addr}/{transport}")
}

pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
