//! ONVIF data types
//!
//! Only the slice of the device and media services the recorder needs.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stream type requested from the media service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    #[default]
    #[value(alias = "rtp-unicast")]
    Unicast,
    #[value(alias = "rtp-multicast")]
    Multicast,
}

impl StreamType {
    /// Value of `tt:Stream` in a stream setup
    pub fn onvif_name(&self) -> &'static str {
        match self {
            StreamType::Unicast => "RTP-Unicast",
            StreamType::Multicast => "RTP-Multicast",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.onvif_name())
    }
}

/// Transport protocol requested from the media service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    #[default]
    Rtsp,
    Http,
    Udp,
}

impl TransportProtocol {
    /// Value of `tt:Protocol` in a stream setup
    pub fn onvif_name(&self) -> &'static str {
        match self {
            TransportProtocol::Rtsp => "RTSP",
            TransportProtocol::Http => "HTTP",
            TransportProtocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.onvif_name())
    }
}

/// Service addresses advertised by `GetCapabilities`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub device_xaddr: Option<String>,
    pub media_xaddr: Option<String>,
    pub ptz_xaddr: Option<String>,
    pub events_xaddr: Option<String>,
    pub imaging_xaddr: Option<String>,
    pub analytics_xaddr: Option<String>,
}

/// A media profile as returned by `GetProfiles`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProfile {
    pub token: String,
    pub name: String,
    pub encoding: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Result of `GetStreamUri`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUri {
    pub uri: String,
    pub invalid_after_connect: bool,
    pub invalid_after_reboot: bool,
    /// ISO 8601 duration as sent by the device, e.g. `PT60S`
    pub timeout: Option<String>,
}

/// Failures talking to the camera
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("device returned SOAP fault: {0}")]
    Fault(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("device does not advertise a {0} service")]
    MissingService(&'static str),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Http(e.to_string())
    }
}
