//! Endpoint providers.
//!
//! A provider publishes the gateways to probe and the credentials needed to
//! open a tunnel to them. The engine only reads providers.

use std::path::Path;

use serde::Deserialize;

use crate::types::{AuthBundle, Endpoint};

/// Source of candidate endpoints for a probe round.
pub trait EndpointSource: Send + Sync {
    fn name(&self) -> &str;

    /// Endpoints in the provider's order.
    fn endpoints(&self) -> Vec<Endpoint>;

    fn auth(&self) -> AuthBundle;
}

#[derive(Debug, Deserialize)]
struct ProviderFile {
    #[serde(default)]
    auth: AuthBundle,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

/// Provider backed by a static TOML document, loaded once at startup.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    name: String,
    endpoints: Vec<Endpoint>,
    auth: AuthBundle,
}

impl StaticProvider {
    pub fn new(name: &str, endpoints: Vec<Endpoint>, auth: AuthBundle) -> Self {
        Self {
            name: name.to_string(),
            endpoints,
            auth,
        }
    }

    pub fn from_toml_str(name: &str, content: &str) -> anyhow::Result<Self> {
        let file: ProviderFile = toml::from_str(content)?;
        Ok(Self::new(name, file.endpoints, file.auth))
    }

    pub fn from_file(name: &str, path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading provider {name} from {}: {e}", path.display()))?;
        Self::from_toml_str(name, &content)
    }
}

impl EndpointSource for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    fn auth(&self) -> AuthBundle {
        self.auth.clone()
    }
}
