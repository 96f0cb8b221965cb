//! gatewatch.toml configuration parser.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub tunnel: TunnelSettings,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8081".to_string()
}

/// Tuning for probe rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Delay between the end of one round and the start of the next.
    pub interval: String,
    /// Maximum number of endpoints probed concurrently.
    pub max_concurrent: usize,
    /// Echo attempts per endpoint.
    pub ping_count: u32,
    /// Endpoints tested per round; negative means all.
    pub max_endpoints: i64,
    /// Packet loss strictly below this ratio is healthy.
    pub health_threshold: f64,
    pub dial_timeout: String,
    pub probe_timeout: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: "10m".to_string(),
            max_concurrent: 20,
            ping_count: 5,
            max_endpoints: -1,
            health_threshold: 0.8,
            dial_timeout: "5s".to_string(),
            probe_timeout: "4s".to_string(),
        }
    }
}

impl ProbeSettings {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(600))
    }

    pub fn dial_timeout(&self) -> Duration {
        parse_duration(&self.dial_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(4))
    }

    /// Number of endpoints to test out of `eligible` candidates.
    pub fn endpoint_cap(&self, eligible: usize) -> usize {
        match usize::try_from(self.max_endpoints) {
            Ok(max) => max.min(eligible),
            Err(_) => eligible,
        }
    }
}

/// Collaborator configuration forwarded to the tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    pub cipher: String,
    pub auth: String,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            cipher: "AES-256-GCM".to_string(),
            auth: "SHA512".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Provider file, resolved against the config file's directory when relative.
    pub path: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl GatewatchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: GatewatchConfig = toml::from_str(&content)?;
        if let Some(dir) = path.parent() {
            for provider in &mut config.providers {
                if provider.path.is_relative() {
                    provider.path = dir.join(&provider.path);
                }
            }
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let probe = &self.probe;
        if probe.max_concurrent == 0 {
            anyhow::bail!("probe.max_concurrent must be at least 1");
        }
        if probe.ping_count == 0 {
            anyhow::bail!("probe.ping_count must be at least 1");
        }
        if !(probe.health_threshold > 0.0 && probe.health_threshold <= 1.0) {
            anyhow::bail!(
                "probe.health_threshold must be in (0, 1], got {}",
                probe.health_threshold
            );
        }
        for (field, raw) in [
            ("interval", &probe.interval),
            ("dial_timeout", &probe.dial_timeout),
            ("probe_timeout", &probe.probe_timeout),
        ] {
            match parse_duration(raw) {
                Some(d) if !d.is_zero() => {}
                _ => anyhow::bail!("probe.{field} is not a positive duration: {raw:?}"),
            }
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                anyhow::bail!("duplicate provider name: {}", provider.name);
            }
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "10m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
