// BLE central transport backed by btleplug
//
// Every `Transport` call returns immediately; the btleplug work runs on
// spawned tokio tasks and reports back through the link event channel.
// Must be used from within a tokio runtime.
//
// On Linux this needs BlueZ and `libdbus-1-dev` at build time.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock;
use crate::link::{LinkEvent, Transport, TransportError, WriteRequest};
use crate::protocol::{from_base64, to_base64};

pub struct BtleplugTransport {
    adapter: Adapter,
    events: UnboundedSender<LinkEvent>,
    discovered: Arc<Mutex<HashMap<String, PeripheralId>>>,
    peripheral: Arc<Mutex<Option<Peripheral>>>,
    connected: Arc<AtomicBool>,
    scan_task: Option<JoinHandle<()>>,
    notify_task: Option<JoinHandle<()>>,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter on this machine
    pub async fn open(events: UnboundedSender<LinkEvent>) -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Unavailable("no Bluetooth adapter found".to_string()))?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        Ok(Self {
            adapter,
            events,
            discovered: Arc::new(Mutex::new(HashMap::new())),
            peripheral: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            scan_task: None,
            notify_task: None,
        })
    }

    fn current_peripheral(&self) -> Result<Peripheral, TransportError> {
        lock(&self.peripheral)
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn stop_notifications(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}

/// Match on characteristic id, preferring the requested service
fn find_characteristic(
    characteristics: &BTreeSet<Characteristic>,
    service: Uuid,
    characteristic: Uuid,
) -> Option<Characteristic> {
    characteristics
        .iter()
        .find(|c| c.uuid == characteristic && c.service_uuid == service)
        .or_else(|| characteristics.iter().find(|c| c.uuid == characteristic))
        .cloned()
}

fn device_key(id: &PeripheralId) -> String {
    format!("{:?}", id)
}

impl Transport for BtleplugTransport {
    fn discover(&mut self, services: &[Uuid]) -> Result<(), TransportError> {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        lock(&self.discovered).clear();

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let discovered = Arc::clone(&self.discovered);
        let peripheral = Arc::clone(&self.peripheral);
        let connected = Arc::clone(&self.connected);
        let filter = ScanFilter {
            services: services.to_vec(),
        };

        self.scan_task = Some(tokio::spawn(async move {
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot listen for adapter events: {}", e);
                    return;
                }
            };
            if let Err(e) = adapter.start_scan(filter).await {
                warn!("Failed to start scan: {}", e);
                return;
            }

            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) => {
                        let properties = match adapter.peripheral(&id).await {
                            Ok(p) => p.properties().await.ok().flatten(),
                            Err(e) => {
                                debug!("Discovered device vanished: {}", e);
                                continue;
                            }
                        };
                        let key = device_key(&id);
                        lock(&discovered).insert(key.clone(), id);
                        let _ = events.send(LinkEvent::DeviceDiscovered {
                            id: key,
                            name: properties.as_ref().and_then(|p| p.local_name.clone()),
                            rssi: properties.and_then(|p| p.rssi),
                        });
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let ours = lock(&peripheral)
                            .as_ref()
                            .is_some_and(|p| p.id() == id);
                        if ours && connected.swap(false, Ordering::SeqCst) {
                            let _ = events.send(LinkEvent::Disconnected {
                                reason: Some("device disconnected".to_string()),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }));
        Ok(())
    }

    fn connect(&mut self, device: &str) -> Result<(), TransportError> {
        let id = lock(&self.discovered)
            .get(device)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDevice(device.to_string()))?;

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let slot = Arc::clone(&self.peripheral);
        let connected = Arc::clone(&self.connected);

        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!("stop_scan failed: {}", e);
            }

            let result = async {
                let peripheral = adapter.peripheral(&id).await?;
                peripheral.connect().await?;
                peripheral.discover_services().await?;
                Ok::<_, btleplug::Error>(peripheral)
            }
            .await;

            match result {
                Ok(peripheral) => {
                    *lock(&slot) = Some(peripheral);
                    connected.store(true, Ordering::SeqCst);
                    let _ = events.send(LinkEvent::Connected);
                }
                Err(e) => {
                    warn!("Connection failed: {}", e);
                    let _ = events.send(LinkEvent::Disconnected {
                        reason: Some(format!("connection failed: {}", e)),
                    });
                }
            }
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stop_notifications();
        self.connected.store(false, Ordering::SeqCst);

        if let Some(peripheral) = lock(&self.peripheral).take() {
            tokio::spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("Disconnect failed: {}", e);
                }
            });
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn write(&mut self, request: WriteRequest) -> Result<(), TransportError> {
        let peripheral = self.current_peripheral()?;
        let characteristic = find_characteristic(
            &peripheral.characteristics(),
            request.service,
            request.characteristic,
        )
        .ok_or(TransportError::CharacteristicNotFound {
            service: request.service,
            characteristic: request.characteristic,
        })?;
        let bytes =
            from_base64(&request.payload).map_err(|e| TransportError::Write(e.to_string()))?;
        let write_type = if request.with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        let events = self.events.clone();
        tokio::spawn(async move {
            match peripheral.write(&characteristic, &bytes, write_type).await {
                Ok(()) => {
                    let _ = events.send(LinkEvent::WriteComplete(request.id));
                }
                // No completion: the link's fallback timer releases the gate
                Err(e) => warn!("Write {:?} failed: {}", request.id, e),
            }
        });
        Ok(())
    }

    fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        _persistent: bool,
    ) -> Result<(), TransportError> {
        let peripheral = self.current_peripheral()?;
        let target = find_characteristic(&peripheral.characteristics(), service, characteristic)
            .ok_or(TransportError::CharacteristicNotFound {
                service,
                characteristic,
            })?;

        self.stop_notifications();
        let events = self.events.clone();
        self.notify_task = Some(tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot open notification stream: {}", e);
                    return;
                }
            };
            if let Err(e) = peripheral.subscribe(&target).await {
                warn!("Subscribe to {} failed: {}", target.uuid, e);
                return;
            }

            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                let sent = events.send(LinkEvent::Notification {
                    service,
                    characteristic,
                    payload: to_base64(&notification.value),
                });
                if sent.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn fail_with_reason(&mut self, reason: &str) {
        warn!("Dropping BLE connection: {}", reason);
        self.disconnect();
        let _ = self.events.send(LinkEvent::Disconnected {
            reason: Some(reason.to_string()),
        });
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        self.stop_notifications();
    }
}
