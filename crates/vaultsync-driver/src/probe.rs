//! Endpoint connectivity probing.
//!
//! Probes fail fast: a destructive pipeline should find out within
//! seconds that an endpoint is down, long before any mutating phase.

use crate::DatabaseDriver;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};
use vaultsync_core::{Error, Result};

/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Verifies a database endpoint is reachable and ready.
pub struct ConnectivityProbe {
    timeout: Duration,
}

impl Default for ConnectivityProbe {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ConnectivityProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probe one endpoint, mapping both ping failure and timeout to
    /// `EndpointUnreachable`.
    pub async fn check(&self, driver: &dyn DatabaseDriver) -> Result<()> {
        let label = driver.endpoint().label.clone();
        debug!("Probing endpoint: {}", label);

        match timeout(self.timeout, driver.ping()).await {
            Ok(Ok(())) => {
                info!("Endpoint reachable: {}", label);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::endpoint_unreachable(label, e.to_string())),
            Err(_) => Err(Error::endpoint_unreachable(
                label,
                format!("probe timed out after {:?}", self.timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;

    #[tokio::test]
    async fn test_probe_reachable() {
        let driver = MemoryDriver::with_label("local");
        let probe = ConnectivityProbe::default();
        probe.check(&driver).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let driver = MemoryDriver::with_label("remote");
        driver.fail_ping(true);
        let probe = ConnectivityProbe::default();
        let err = probe.check(&driver).await.unwrap_err();
        assert!(matches!(err, Error::EndpointUnreachable { .. }));
    }
}
