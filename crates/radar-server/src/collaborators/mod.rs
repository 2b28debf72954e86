//! System-backed implementations of the engine's collaborators.

use std::sync::Arc;

use radar_core::{BluetoothDiscovery, CollaboratorError, Collaborators, StateSink};

pub mod bluetooth;
pub mod passive;
pub mod probe;
pub mod resolver;
pub mod sweep;

pub use bluetooth::NullDiscovery;
pub use passive::NeighborWatcher;
pub use probe::SystemProber;
pub use resolver::SystemResolver;
pub use sweep::ArpScanSweeper;

/// Collaborators backed by this host's tools and adapters.
///
/// A missing Bluetooth adapter is not an error: discovery falls back to
/// [`NullDiscovery`] and rounds carry on with network channels only. The
/// returned flag tells whether real Bluetooth discovery is in use.
///
/// # Errors
///
/// Returns an error if the HTTP client for URL probes cannot be built.
pub async fn system(sink: Arc<dyn StateSink>) -> Result<(Collaborators, bool), CollaboratorError> {
    let (bluetooth, available) = bluetooth_discovery().await;
    Ok((
        Collaborators {
            sweeper: Arc::new(ArpScanSweeper::new()),
            prober: Arc::new(SystemProber::new()?),
            resolver: Arc::new(SystemResolver),
            bluetooth,
            sink,
        },
        available,
    ))
}

#[cfg(feature = "bluetooth")]
async fn bluetooth_discovery() -> (Arc<dyn BluetoothDiscovery>, bool) {
    match bluetooth::BluerDiscovery::new().await {
        Ok(discovery) => (Arc::new(discovery), true),
        Err(e) => {
            tracing::warn!(error = %e, "Bluetooth discovery disabled");
            (Arc::new(NullDiscovery::new(e.to_string())), false)
        }
    }
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn bluetooth_discovery() -> (Arc<dyn BluetoothDiscovery>, bool) {
    tracing::info!("Built without the `bluetooth` feature; Bluetooth discovery disabled");
    (
        Arc::new(NullDiscovery::new(
            "built without the `bluetooth` feature",
        )),
        false,
    )
}

#[cfg(all(test, not(feature = "bluetooth")))]
mod tests {
    use super::*;
    use radar_core::MemoryStateSink;

    #[tokio::test]
    async fn test_system_collaborators_without_bluetooth() {
        let (collaborators, bluetooth) = system(Arc::new(MemoryStateSink::new()))
            .await
            .unwrap();
        assert!(!bluetooth);
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let err = collaborators
            .bluetooth
            .discover(std::time::Duration::from_secs(1), &[], tx)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable { .. }));
    }
}
