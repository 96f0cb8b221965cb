//! Probe round logic.
//!
//! A [`Checker`] runs one round over its provider's endpoints and streams a
//! [`Measurement`] per probed endpoint into a channel. The channel is closed
//! once every probe task has finished.

use std::sync::Arc;

use async_trait::async_trait;
use gatewatch_core::{
    AuthBundle, Credentials, Endpoint, EndpointSource, Measurement, ProbeSettings, TunnelSettings,
};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::{HealthError, HealthResult};
use crate::tunnel::{ConnectParams, Protocol, TunnelProbe};

pub const VPN_KIND: &str = "vpn";
pub const OPENVPN_PROTO: &str = "openvpn";

/// A service checker. The scheduler only talks to this interface.
#[async_trait]
pub trait Checker: Send + Sync {
    fn kind(&self) -> &str;

    fn proto(&self) -> &str;

    fn provider_name(&self) -> &str;

    /// Run one round, sending results into `tx`.
    ///
    /// `tx` is dropped when the call returns, which closes the stream.
    async fn run(&self, tx: mpsc::Sender<Measurement>) -> HealthResult<()>;
}

/// Healthy when the loss ratio is strictly below the threshold.
pub fn classify(loss: f64, threshold: f64) -> bool {
    loss < threshold
}

/// Eligible endpoints in source order, capped by `max_endpoints`.
pub fn select_candidates(endpoints: Vec<Endpoint>, settings: &ProbeSettings) -> Vec<Endpoint> {
    let mut eligible: Vec<Endpoint> = endpoints.into_iter().filter(Endpoint::is_eligible).collect();
    let cap = settings.endpoint_cap(eligible.len());
    eligible.truncate(cap);
    eligible
}

/// Shared by every probe task of a checker.
struct ProbeContext<P> {
    probe: P,
    settings: ProbeSettings,
    tunnel: TunnelSettings,
}

/// Checks OpenVPN gateways published by a provider.
pub struct VpnChecker<P: TunnelProbe> {
    provider: Option<Arc<dyn EndpointSource>>,
    ctx: Arc<ProbeContext<P>>,
}

impl<P: TunnelProbe> VpnChecker<P> {
    pub fn new(
        provider: Option<Arc<dyn EndpointSource>>,
        probe: P,
        settings: ProbeSettings,
        tunnel: TunnelSettings,
    ) -> Self {
        Self {
            provider,
            ctx: Arc::new(ProbeContext { probe, settings, tunnel }),
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.ctx.settings
    }
}

#[async_trait]
impl<P: TunnelProbe> Checker for VpnChecker<P> {
    fn kind(&self) -> &str {
        VPN_KIND
    }

    fn proto(&self) -> &str {
        OPENVPN_PROTO
    }

    fn provider_name(&self) -> &str {
        self.provider.as_ref().map(|p| p.name()).unwrap_or_default()
    }

    async fn run(&self, tx: mpsc::Sender<Measurement>) -> HealthResult<()> {
        let provider = self.provider.as_ref().ok_or(HealthError::NotReady)?;

        let endpoints = provider.endpoints();
        let total = endpoints.len();
        let candidates = select_candidates(endpoints, &self.ctx.settings);
        let auth = Arc::new(provider.auth());
        info!(
            provider = provider.name(),
            total,
            selected = candidates.len(),
            "got endpoints"
        );

        let sem = Arc::new(Semaphore::new(self.ctx.settings.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let selected = candidates.len();

        for (i, endpoint) in candidates.into_iter().enumerate() {
            // Admission: a task is only spawned once it holds a slot.
            let Ok(permit) = Arc::clone(&sem).acquire_owned().await else {
                break;
            };
            debug!(endpoint = %endpoint.key(), "measuring endpoint {}/{}", i + 1, selected);

            let ctx = Arc::clone(&self.ctx);
            let auth = Arc::clone(&auth);
            let tx = tx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                if let Some(m) = probe_endpoint(&ctx, &endpoint, &auth).await {
                    // Receiver gone means nobody wants the round any more.
                    let _ = tx.send(m).await;
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "probe task failed");
            }
        }
        drop(tx);
        Ok(())
    }
}

/// Probe one endpoint. Returns `None` when the endpoint cannot be probed at all.
async fn probe_endpoint<P: TunnelProbe>(
    ctx: &ProbeContext<P>,
    endpoint: &Endpoint,
    auth: &AuthBundle,
) -> Option<Measurement> {
    let key = endpoint.key();

    // Malformed fields are passed on empty instead of skipping the endpoint,
    // which can hide a broken provider bundle. Kept until that is settled.
    let (credentials, errors) = Credentials::decode_lossy(auth);
    for (field, e) in errors {
        warn!(%key, field, error = %e, "credential decode failed, using empty value");
    }

    let protocol = match Protocol::from_tag(&endpoint.transport) {
        Ok(p) => p,
        Err(e) => {
            warn!(%key, error = %e, "skipping endpoint");
            return None;
        }
    };

    let params = ConnectParams {
        remote: endpoint.addr(),
        protocol,
        cipher: ctx.tunnel.cipher.clone(),
        auth: ctx.tunnel.auth.clone(),
        credentials,
    };
    let mut m = Measurement::new(endpoint.addr(), &endpoint.transport, false);

    let dial_timeout = ctx.settings.dial_timeout();
    let mut session = match time::timeout(dial_timeout, ctx.probe.establish(&params, dial_timeout)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            debug!(%key, error = %e, "tunnel establishment failed");
            return Some(m);
        }
        Err(_) => {
            debug!(%key, timeout = ?dial_timeout, "tunnel establishment timed out");
            return Some(m);
        }
    };

    let probe_timeout = ctx.settings.probe_timeout();
    let measured = time::timeout(
        probe_timeout,
        ctx.probe.measure(&mut session, ctx.settings.ping_count, probe_timeout),
    )
    .await;
    ctx.probe.teardown(session).await;

    match measured {
        Ok(Ok(loss)) => {
            m.healthy = classify(loss, ctx.settings.health_threshold);
            debug!(%key, proto = protocol.as_str(), loss, healthy = m.healthy, "probe finished");
        }
        Ok(Err(e)) => debug!(%key, error = %e, "reachability probe failed"),
        Err(_) => debug!(%key, timeout = ?probe_timeout, "reachability probe timed out"),
    }
    Some(m)
}
