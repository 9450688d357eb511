//! ONVIF camera access
//!
//! Capabilities, media profiles and stream URIs. `OnvifClient` is the
//! recorder's production `StreamSource`.

pub mod client;
pub mod soap;
pub mod types;

pub use client::OnvifClient;
pub use types::{
    DeviceCapabilities, MediaProfile, MediaUri, SourceError, StreamType, TransportProtocol,
};
