//! Feature identifiers and capability negotiation.
//!
//! A device advertises the features it implements as `(feature, version)`
//! pairs in response to the core feature's "get supported features"
//! command. Each pair selects one plugin.

use bytes::Bytes;

use crate::protocol::packet::{GaiaPacket, REFERENCE_VENDOR_ID, Reason};

/// Command id of the core feature's "get supported features" request.
pub const GET_SUPPORTED_FEATURES: u8 = 0x01;

/// Command id of the core feature's "get supported features next" request.
pub const GET_SUPPORTED_FEATURES_NEXT: u8 = 0x02;

/// Known feature identifiers for the reference vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FeatureId {
    /// Core device information and feature negotiation.
    Core = 0x00,
    /// Earbud pairing and role information.
    Earbud = 0x01,
    /// Legacy active noise cancellation.
    LegacyAnc = 0x02,
    /// Voice assistant selection.
    VoiceAssistant = 0x03,
    /// Debug and log access.
    Debug = 0x04,
    /// Music processing (EQ).
    MusicProcessing = 0x05,
    /// Firmware upgrade.
    Upgrade = 0x06,
    /// Handset features (multipoint).
    Handset = 0x07,
    /// Audio curation (ANC and transparency).
    AudioCuration = 0x08,
    /// Earbud fit test.
    EarbudFit = 0x09,
    /// Voice processing (cVc).
    VoiceProcessing = 0x0A,
    /// Earbud UI gestures.
    EarbudUi = 0x0B,
    /// Statistics collection.
    Statistics = 0x0C,
    /// Battery levels.
    Battery = 0x0D,
    /// Sentinel for identifiers outside the enumeration.
    Unknown = 0x7F,
}

impl FeatureId {
    /// Attempts to parse a feature identifier from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Core),
            0x01 => Some(Self::Earbud),
            0x02 => Some(Self::LegacyAnc),
            0x03 => Some(Self::VoiceAssistant),
            0x04 => Some(Self::Debug),
            0x05 => Some(Self::MusicProcessing),
            0x06 => Some(Self::Upgrade),
            0x07 => Some(Self::Handset),
            0x08 => Some(Self::AudioCuration),
            0x09 => Some(Self::EarbudFit),
            0x0A => Some(Self::VoiceProcessing),
            0x0B => Some(Self::EarbudUi),
            0x0C => Some(Self::Statistics),
            0x0D => Some(Self::Battery),
            0x7F => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Parses a feature identifier, mapping unknown values to [`FeatureId::Unknown`].
    #[must_use]
    pub const fn from_byte_lossy(byte: u8) -> Self {
        match Self::from_byte(byte) {
            Some(id) => id,
            None => Self::Unknown,
        }
    }
}

impl From<FeatureId> for u8 {
    fn from(id: FeatureId) -> Self {
        id as Self
    }
}

/// A feature advertised by a device during capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureDescriptor {
    /// Feature identifier.
    pub feature: FeatureId,
    /// Feature version implemented by the device.
    pub version: u8,
}

impl FeatureDescriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub const fn new(feature: FeatureId, version: u8) -> Self {
        Self { feature, version }
    }
}

/// Supported features parsed from one negotiation response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedFeatures {
    /// Descriptors in the order the device reported them.
    pub features: Vec<FeatureDescriptor>,
    /// True if the device has more features to report.
    pub more_to_come: bool,
}

/// Parses a "get supported features" response payload.
///
/// Format:
/// ```text
/// [more_to_come:1] ([feature:1] [version:1])*
/// ```
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn parse_supported_features(data: &[u8]) -> SupportedFeatures {
    let Some((&more, pairs)) = data.split_first() else {
        return SupportedFeatures::default();
    };

    let features = pairs
        .chunks_exact(2)
        .map(|pair| FeatureDescriptor::new(FeatureId::from_byte_lossy(pair[0]), pair[1]))
        .collect();

    SupportedFeatures {
        features,
        more_to_come: more != 0,
    }
}

/// Builds the core "get supported features" request.
///
/// Set `next` when continuing after a response with `more_to_come`.
#[must_use]
pub fn supported_features_request(next: bool) -> GaiaPacket {
    let command = if next {
        GET_SUPPORTED_FEATURES_NEXT
    } else {
        GET_SUPPORTED_FEATURES
    };
    GaiaPacket::new(
        REFERENCE_VENDOR_ID,
        FeatureId::Core.into(),
        Reason::Command,
        command,
        Bytes::new(),
    )
}
