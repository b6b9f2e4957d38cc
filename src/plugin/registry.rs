//! Plugin registry for instantiating handlers by feature.
//!
//! The registry maps a feature identifier to a constructor. When a device
//! reports its supported features, one plugin is built per advertised
//! feature that has a constructor.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = PluginRegistry::new();
//! registry.register(FeatureId::Battery, |version, device, channel, bus| {
//!     Box::new(BatteryPlugin::new(version, device.clone(), channel, bus))
//! });
//! ```

use std::collections::HashMap;

use crate::connection::DeviceIdentity;
use crate::event::EventBus;
use crate::plugin::{OutboundChannel, Plugin};
use crate::protocol::{FeatureDescriptor, FeatureId};

/// Constructor stored for a feature.
pub type PluginConstructor =
    Box<dyn Fn(u8, &DeviceIdentity, OutboundChannel, EventBus) -> Box<dyn Plugin> + Send + Sync>;

/// Registry mapping feature identifiers to plugin constructors.
#[derive(Default)]
pub struct PluginRegistry {
    constructors: HashMap<FeatureId, PluginConstructor>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("features", &self.features())
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a constructor for a feature.
    ///
    /// A later registration for the same feature replaces the earlier one.
    /// Returns true if a constructor was replaced.
    pub fn register<F>(&mut self, feature: FeatureId, constructor: F) -> bool
    where
        F: Fn(u8, &DeviceIdentity, OutboundChannel, EventBus) -> Box<dyn Plugin>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(feature, Box::new(constructor))
            .is_some()
    }

    /// Returns true if a constructor is registered for `feature`.
    #[must_use]
    pub fn is_registered(&self, feature: FeatureId) -> bool {
        self.constructors.contains_key(&feature)
    }

    /// Registered features in ascending order.
    #[must_use]
    pub fn features(&self) -> Vec<FeatureId> {
        let mut features: Vec<_> = self.constructors.keys().copied().collect();
        features.sort_unstable();
        features
    }

    /// Number of registered constructors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Builds one plugin per advertised feature with a registered
    /// constructor, in advertised order.
    ///
    /// Features without a constructor are skipped.
    #[must_use]
    pub fn instantiate_for_device(
        &self,
        device: &DeviceIdentity,
        features: &[FeatureDescriptor],
        channel: &OutboundChannel,
        bus: &EventBus,
    ) -> Vec<Box<dyn Plugin>> {
        features
            .iter()
            .filter_map(|descriptor| {
                let Some(constructor) = self.constructors.get(&descriptor.feature) else {
                    tracing::debug!(
                        "no plugin for feature {:?} v{}",
                        descriptor.feature,
                        descriptor.version
                    );
                    return None;
                };
                tracing::debug!(
                    "creating plugin for feature {:?} v{} on {}",
                    descriptor.feature,
                    descriptor.version,
                    device
                );
                Some(constructor(
                    descriptor.version,
                    device,
                    channel.clone(),
                    bus.clone(),
                ))
            })
            .collect()
    }
}
