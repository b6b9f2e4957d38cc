//! Device discovery and connection sources.
//!
//! One [`ConnectionSource`] exists per transport kind. Sources never block:
//! every operation is a request whose outcome arrives later as a
//! [`ConnectionEvent`] on the sender registered with
//! [`ConnectionSource::set_event_sender`].

use std::hash::{Hash, Hasher};

use tokio::sync::mpsc;

use crate::error::Error;
use crate::protocol::Framing;

/// Transport classes a device can be reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Bluetooth Low Energy GATT.
    Ble,
    /// Accessory-protocol byte stream.
    AccessoryStream,
}

impl ConnectionKind {
    /// Framing used on this kind of link.
    #[must_use]
    pub const fn framing(self) -> Framing {
        match self {
            Self::Ble => Framing::Gatt,
            Self::AccessoryStream => Framing::Stream,
        }
    }
}

/// Identity of a device on one transport.
///
/// Two identities are equal when their kind and transport-specific id
/// match; the display name is not part of the identity.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Transport-specific identifier (peripheral UUID, accessory serial...).
    pub id: String,
    /// Transport the identifier belongs to.
    pub kind: ConnectionKind,
    /// Advertised name, if known.
    pub name: Option<String>,
}

impl DeviceIdentity {
    /// Creates an unnamed identity.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ConnectionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
        }
    }

    /// Sets the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Connection state of a discovered device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connection requested.
    Connecting,
    /// Connected and usable.
    Connected,
    /// Disconnection requested.
    Disconnecting,
}

/// A discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Identity of the device.
    pub identity: DeviceIdentity,
    /// Connection state.
    pub state: DeviceState,
    /// Last signal strength in dBm, if the transport reports it.
    pub rssi: Option<i16>,
}

/// Events emitted by a connection source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Scanning or availability changed.
    StateChanged {
        kind: ConnectionKind,
        available: bool,
        scanning: bool,
    },
    /// A device was found or updated.
    DeviceDiscovered(DeviceIdentity),
    /// A device connected.
    DeviceConnected(DeviceIdentity),
    /// A connection attempt failed, usually with [`Error::ConnectFailed`].
    DeviceFailedToConnect {
        device: DeviceIdentity,
        error: Error,
    },
    /// A device disconnected, with the transport's error if it was not
    /// requested.
    DeviceDisconnected {
        device: DeviceIdentity,
        error: Option<Error>,
    },
}

/// Discovery and connection for one transport kind.
pub trait ConnectionSource: Send {
    /// Transport kind served by this source.
    fn kind(&self) -> ConnectionKind;

    /// Returns true while a scan is running.
    fn is_scanning(&self) -> bool;

    /// Returns true if the underlying radio or accessory bus is usable.
    fn is_available(&self) -> bool;

    /// Currently discovered devices.
    fn devices(&self) -> Vec<Device>;

    /// Starts discovery.
    fn start_scanning(&mut self);

    /// Stops discovery.
    fn stop_scanning(&mut self);

    /// Forgets discovered devices.
    ///
    /// Transports may keep devices that are still connected.
    fn clear_device_list(&mut self);

    /// Requests a connection.
    fn connect(&mut self, device: &DeviceIdentity);

    /// Requests a disconnection.
    fn disconnect(&mut self, device: &DeviceIdentity);

    /// Cancels a pending connection request.
    fn cancel_connect(&mut self, device: &DeviceIdentity);

    /// Registers the channel that receives this source's events.
    fn set_event_sender(&mut self, tx: mpsc::UnboundedSender<ConnectionEvent>);
}

/// Device bookkeeping shared by source implementations.
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    devices: Vec<Device>,
}

impl DeviceList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Adds a device or refreshes its name and signal strength.
    ///
    /// Returns true if the device was not known before.
    pub fn upsert(&mut self, identity: DeviceIdentity, rssi: Option<i16>) -> bool {
        if let Some(device) = self.devices.iter_mut().find(|d| d.identity == identity) {
            if identity.name.is_some() {
                device.identity.name = identity.name;
            }
            if rssi.is_some() {
                device.rssi = rssi;
            }
            return false;
        }
        self.devices.push(Device {
            identity,
            state: DeviceState::Disconnected,
            rssi,
        });
        true
    }

    /// Updates a device's state. Returns false if it is unknown.
    pub fn set_state(&mut self, identity: &DeviceIdentity, state: DeviceState) -> bool {
        match self.devices.iter_mut().find(|d| &d.identity == identity) {
            Some(device) => {
                device.state = state;
                true
            }
            None => false,
        }
    }

    /// Looks up a device.
    #[must_use]
    pub fn get(&self, identity: &DeviceIdentity) -> Option<&Device> {
        self.devices.iter().find(|d| &d.identity == identity)
    }

    /// Removes a device, returning it.
    pub fn remove(&mut self, identity: &DeviceIdentity) -> Option<Device> {
        let index = self.devices.iter().position(|d| &d.identity == identity)?;
        Some(self.devices.remove(index))
    }

    /// Drops devices; with `retain_connected`, only disconnected ones.
    pub fn clear(&mut self, retain_connected: bool) {
        if retain_connected {
            self.devices
                .retain(|d| d.state != DeviceState::Disconnected);
        } else {
            self.devices.clear();
        }
    }

    /// Snapshot of the devices in discovery order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Device> {
        self.devices.clone()
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no device is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
