//! Device/service type identifiers.
//!
//! Matching only needs string identity: a query's urn either equals a
//! candidate's or it doesn't, so `Message::urn` is a plain `String`.
//! `device_urn`/`service_urn` are convenience formatters for the
//! common `urn:schemas-upnp-org:...` shape; anything else is passed
//! through untouched.

/// Builds `urn:schemas-upnp-org:device:<name>:<version>`.
pub fn device_urn(name: &str, version: u8) -> String {
    format!("urn:schemas-upnp-org:device:{name}:{version}")
}

/// Builds `urn:schemas-upnp-org:service:<name>:<version>`.
pub fn service_urn(name: &str, version: u8) -> String {
    format!("urn:schemas-upnp-org:service:{name}:{version}")
}
