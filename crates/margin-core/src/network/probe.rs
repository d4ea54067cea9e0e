//! HTTP reachability probe feeding the network monitor.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::NetworkMonitor;
use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const PROBE_TIMEOUT_SECS: u64 = 4;

/// Polls a health endpoint and reports reachability.
///
/// Any HTTP response counts as online; connection failures and timeouts count
/// as offline.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl ConnectivityProbe {
    pub fn new(url: impl Into<String>, interval: Duration) -> Result<Self> {
        let url = normalize_text_option(Some(url.into()))
            .filter(|url| is_http_url(url))
            .ok_or_else(|| {
                Error::Config("probe URL must include http:// or https://".to_string())
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::Config(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            url,
            interval,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Probe once.
    pub async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                tracing::trace!("Probe {} answered {}", self.url, response.status());
                true
            }
            Err(error) => {
                tracing::debug!("Probe {} failed: {}", self.url, error);
                false
            }
        }
    }

    /// Probe on every interval tick until `shutdown` flips to `true`.
    pub fn spawn(self, monitor: NetworkMonitor, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let online = self.check().await;
                        monitor.set_online(online);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Connectivity probe for {} stopped", self.url);
        })
    }
}
