//! Bluetooth discovery.
//!
//! With the `bluetooth` feature this talks to BlueZ over D-Bus through
//! `bluer`, which needs the `bluetoothd` daemon. Without it, or when no
//! adapter is present, [`NullDiscovery`] stands in and every pass fails as
//! unavailable.

use std::time::Duration;

use futures::future::BoxFuture;
use radar_core::{BluetoothDiscovery, BluetoothFound, CollaboratorError, MacAddress};
use tokio::sync::mpsc;

const NAME: &str = "bluetooth";

/// Discovery that is never available.
#[derive(Debug, Clone)]
pub struct NullDiscovery {
    reason: String,
}

impl NullDiscovery {
    /// Report `reason` on every pass.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl BluetoothDiscovery for NullDiscovery {
    fn discover<'a>(
        &'a self,
        _window: Duration,
        _targets: &'a [MacAddress],
        _found: mpsc::Sender<BluetoothFound>,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move { Err(CollaboratorError::unavailable(NAME, self.reason.clone())) })
    }
}

#[cfg(feature = "bluetooth")]
pub use self::bluez::BluerDiscovery;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::time::Duration;

    use bluer::{Adapter, AdapterEvent, Address, Session};
    use futures::future::BoxFuture;
    use futures::StreamExt;
    use radar_core::{BluetoothDiscovery, BluetoothFound, CollaboratorError, MacAddress};
    use tokio::sync::{mpsc, Notify};

    use super::NAME;

    #[allow(clippy::needless_pass_by_value)]
    fn unavailable(err: bluer::Error) -> CollaboratorError {
        CollaboratorError::unavailable(NAME, err.to_string())
    }

    /// BlueZ discovery on the default adapter.
    pub struct BluerDiscovery {
        _session: Session,
        adapter: Adapter,
        stop: Notify,
    }

    impl std::fmt::Debug for BluerDiscovery {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("BluerDiscovery")
                .field("adapter", &self.adapter.name())
                .finish_non_exhaustive()
        }
    }

    impl BluerDiscovery {
        /// Open a session and power on the default adapter.
        ///
        /// # Errors
        ///
        /// Returns an error if `bluetoothd` is not reachable or no adapter
        /// exists.
        pub async fn new() -> Result<Self, CollaboratorError> {
            let session = Session::new().await.map_err(unavailable)?;
            let adapter = session.default_adapter().await.map_err(unavailable)?;
            adapter.set_powered(true).await.map_err(unavailable)?;
            tracing::info!(adapter = adapter.name(), "Bluetooth adapter ready");
            Ok(Self {
                _session: session,
                adapter,
                stop: Notify::new(),
            })
        }

        async fn describe(&self, address: Address) -> Option<BluetoothFound> {
            let device = self.adapter.device(address).ok()?;
            Some(BluetoothFound {
                address: MacAddress(address.0),
                vendor: None,
                rssi: device.rssi().await.ok().flatten(),
                name: device.name().await.ok().flatten(),
            })
        }

        async fn run(
            &self,
            window: Duration,
            found: mpsc::Sender<BluetoothFound>,
        ) -> Result<(), CollaboratorError> {
            let events = self
                .adapter
                .discover_devices()
                .await
                .map_err(|e| CollaboratorError::failed(NAME, e.to_string()))?;
            futures::pin_mut!(events);
            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    () = self.stop.notified() => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(address)) => {
                            let Some(device) = self.describe(address).await else {
                                continue;
                            };
                            if found.send(device).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            Ok(())
        }
    }

    impl BluetoothDiscovery for BluerDiscovery {
        fn discover<'a>(
            &'a self,
            window: Duration,
            _targets: &'a [MacAddress],
            found: mpsc::Sender<BluetoothFound>,
        ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
            Box::pin(self.run(window, found))
        }

        fn stop(&self) {
            self.stop.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_discovery_is_unavailable() {
        let discovery = NullDiscovery::new("built without Bluetooth support");
        let (tx, mut rx) = mpsc::channel(1);
        let err = discovery
            .discover(Duration::from_secs(1), &[], tx)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable { .. }));
        assert!(rx.recv().await.is_none());
    }
}
