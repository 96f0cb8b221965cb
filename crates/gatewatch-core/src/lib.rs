pub mod auth;
pub mod config;
pub mod provider;
pub mod types;

pub use auth::{decode_blob, Credentials, DecodeError};
pub use config::{
    parse_duration, GatewatchConfig, ProbeSettings, ProviderConfig, ServerConfig, TunnelSettings,
};
pub use provider::{EndpointSource, StaticProvider};
pub use types::*;
