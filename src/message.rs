//! SSDP message model: the semantic record carried around the node,
//! plus parsing of and composition into the wire format.
use std::fmt::Write as _;
use std::sync::Arc;

use crate::location::LocationDescriptor;

/// A device announcement: identity plus where to fetch its description.
///
/// A message is publishable iff all three of `uuid`, `urn`, `location`
/// are set. Search queries and byebye notifications leave `location`
/// unset.
#[derive(Clone)]
pub struct Message {
    pub uuid: Option<String>,
    pub urn: Option<String>,
    pub location: Option<Arc<dyn LocationDescriptor>>,
    pub ttl: u32,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("uuid", &self.uuid)
            .field("urn", &self.urn)
            .field("location", &self.location.as_ref().map(|l| l.name()))
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Message {
    pub fn new(uuid: impl Into<String>, urn: impl Into<String>, location: Arc<dyn LocationDescriptor>, ttl: u32) -> Self {
        Self {
            uuid: Some(uuid.into()),
            urn: Some(urn.into()),
            location: Some(location),
            ttl,
        }
    }

    /// A query matching any message with the given uuid/urn; either may
    /// be left `None` to mean "any".
    pub fn query(uuid: Option<String>, urn: Option<String>) -> Self {
        Self {
            uuid,
            urn,
            location: None,
            ttl: 0,
        }
    }

    pub fn is_publishable(&self) -> bool {
        self.uuid.is_some() && self.urn.is_some() && self.location.is_some()
    }

    /// True iff `self` satisfies `query`'s uuid/urn filter. A query with
    /// both fields `None` (`ssdp:all`) matches everything.
    pub fn matches(&self, query: &Message) -> bool {
        query.uuid.as_ref().is_none_or(|u| Some(u) == self.uuid.as_ref())
            && query.urn.as_ref().is_none_or(|u| Some(u) == self.urn.as_ref())
    }

    pub fn usn(&self) -> Option<String> {
        match (&self.uuid, &self.urn) {
            (Some(uuid), Some(urn)) => Some(format!("uuid:{uuid}::{urn}")),
            (Some(uuid), None) => Some(format!("uuid:{uuid}")),
            _ => None,
        }
    }
}

/// A parsed inbound M-SEARCH request.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub uuid: Option<String>,
    pub urn: Option<String>,
    pub mx: u32,
}

impl SearchQuery {
    pub fn as_message(&self) -> Message {
        Message::query(self.uuid.clone(), self.urn.clone())
    }
}

/// The three shapes a received SSDP payload can take.
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Search(SearchQuery),
    /// NOTIFY; `location` present means alive, absent means byebye.
    Notify { uuid: String, urn: String, location: Option<String> },
    /// Unicast HTTP/1.1 response to our own M-SEARCH.
    Response { uuid: String, urn: String, location: String },
}

fn split_usn(usn: &str) -> Option<(String, Option<String>)> {
    let rest = usn.strip_prefix("uuid:").unwrap_or(usn);
    if let Some((uuid, urn)) = rest.split_once("::") {
        Some((uuid.to_string(), Some(urn.to_string())))
    } else if rest.len() == 36 {
        Some((rest.to_string(), None))
    } else {
        None
    }
}

fn header_lines(payload: &str) -> impl Iterator<Item = (String, &str)> {
    payload.lines().skip(1).filter_map(|line| {
        let (name, value) = line.split_once(':')?;
        Some((name.trim().to_ascii_lowercase(), value.trim()))
    })
}

/// Parses a raw SSDP/HTTP payload into a [`ParsedMessage`], or `None`
/// if the payload does not describe anything this node understands.
/// Malformed payloads are dropped rather than surfaced as errors: a
/// hostile or confused peer on the network must never crash a receive
/// loop.
pub fn parse(payload: &str) -> Option<ParsedMessage> {
    let first_line = payload.lines().next()?;

    let mut location = None;
    let mut usn = None;
    let mut mx = None;
    let mut max_age = None;
    let mut st = None;

    for (name, value) in header_lines(payload) {
        match name.as_str() {
            "location" => location = Some(value.to_string()),
            "usn" => usn = Some(value.to_string()),
            "mx" => mx = value.parse::<u32>().ok(),
            "cache-control" => {
                max_age = value
                    .split_once('=')
                    .map(|(_, v)| v.trim())
                    .and_then(|v| v.trim_end_matches(|c: char| !c.is_ascii_digit()).parse().ok());
            }
            "st" => st = Some(value.to_string()),
            _ => {}
        }
    }

    let usn_parts = usn.as_deref().and_then(split_usn);

    if let Some((uuid, urn_from_usn)) = usn_parts {
        if location.is_some() || max_age.is_none() {
            let urn = urn_from_usn.or_else(|| st.clone()).unwrap_or_default();
            return if first_line.starts_with("HTTP/1.1") {
                Some(ParsedMessage::Response {
                    uuid,
                    urn,
                    location: location?,
                })
            } else {
                Some(ParsedMessage::Notify { uuid, urn, location })
            };
        }
    }

    if st.as_deref() == Some("ssdp:all") {
        return Some(ParsedMessage::Search(SearchQuery {
            uuid: None,
            urn: None,
            mx: mx.unwrap_or(0),
        }));
    }

    if let Some(st) = st {
        let mx = mx?;
        if mx > 0 {
            if let Some(uuid) = st.strip_prefix("uuid:") {
                return Some(ParsedMessage::Search(SearchQuery {
                    uuid: Some(uuid.to_string()),
                    urn: None,
                    mx,
                }));
            }
            return Some(ParsedMessage::Search(SearchQuery {
                uuid: None,
                urn: Some(st),
                mx,
            }));
        }
    }

    None
}

/// Renders a search target header value from a query's uuid/urn filter.
fn search_target(uuid: Option<&str>, urn: Option<&str>) -> String {
    if let Some(uuid) = uuid {
        format!("uuid:{uuid}")
    } else if let Some(urn) = urn {
        urn.to_string()
    } else {
        "ssdp:all".to_string()
    }
}

pub fn compose_search(group: &str, port: u16, uuid: Option<&str>, urn: Option<&str>, mx: u32) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
HOST: {group}:{port}\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: {mx}\r\n\
ST: {st}\r\n\r\n",
        st = search_target(uuid, urn),
    )
}

pub fn compose_alive(group: &str, port: u16, server: &str, ttl: u32, location: &str, uuid: &str, urn: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
HOST: {group}:{port}\r\n\
SERVER: {server}\r\n\
CACHE-CONTROL: max-age={ttl}\r\n\
LOCATION: {location}\r\n\
NT: {urn}\r\n\
NTS: ssdp:alive\r\n\
USN: uuid:{uuid}::{urn}\r\n\r\n"
    )
}

pub fn compose_response(server: &str, ttl: u32, location: &str, uuid: &str, urn: &str, date: &str) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "HTTP/1.1 * OK\r\n\
EXT:\r\n\
SERVER: {server}\r\n\
CACHE-CONTROL: max-age={ttl}\r\n\
DATE: {date}\r\n\
LOCATION: {location}\r\n\
NT: {urn}\r\n\
NTS: ssdp:alive\r\n\
USN: uuid:{uuid}::{urn}\r\n\r\n"
    );
    out
}

pub fn compose_byebye(group: &str, port: u16, uuid: &str, urn: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
HOST: {group}:{port}\r\n\
NT: {urn}\r\n\
NTS: ssdp:byebye\r\n\
USN: uuid:{uuid}::{urn}\r\n\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn matches_is_symmetric_on_all_query() {
        let all = Message::query(None, None);
        let candidate = Message::query(Some("u".into()), Some("urn:x".into()));
        assert!(candidate.matches(&all));
    }

    #[test]
    fn matches_requires_both_fields() {
        let q = Message::query(Some("u".into()), None);
        let a = Message::query(Some("u".into()), Some("urn:x".into()));
        let b = Message::query(Some("other".into()), Some("urn:x".into()));
        assert!(a.matches(&q));
        assert!(!b.matches(&q));
    }

    #[test]
    fn parses_alive_notify() {
        let payload = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://192.168.1.1:49152/desc.xml\r\n\
NT: urn:schemas-upnp-org:device:test:1\r\n\
NTS: ssdp:alive\r\n\
SERVER: test/1.0\r\n\
USN: uuid:ebf5a0a0-1dd1-11b2-a92f-e89f80eb7241::urn:schemas-upnp-org:device:test:1\r\n\r\n";
        let parsed = parse(payload).unwrap();
        match parsed {
            ParsedMessage::Notify { uuid, urn, location } => {
                assert_eq!(uuid, "ebf5a0a0-1dd1-11b2-a92f-e89f80eb7241");
                assert_eq!(urn, "urn:schemas-upnp-org:device:test:1");
                assert_eq!(location.unwrap(), "http://192.168.1.1:49152/desc.xml");
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn parses_byebye_notify() {
        let payload = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
NT: urn:schemas-upnp-org:device:test:1\r\n\
NTS: ssdp:byebye\r\n\
USN: uuid:ebf5a0a0-1dd1-11b2-a92f-e89f80eb7241::urn:schemas-upnp-org:device:test:1\r\n\r\n";
        let parsed = parse(payload).unwrap();
        match parsed {
            ParsedMessage::Notify { location, .. } => assert!(location.is_none()),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn parses_msearch_all() {
        let payload = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 2\r\n\
ST: ssdp:all\r\n\r\n";
        let parsed = parse(payload).unwrap();
        assert!(matches!(parsed, ParsedMessage::Search(SearchQuery { uuid: None, urn: None, mx: 2 })));
    }

    #[test]
    fn parses_msearch_urn() {
        let payload = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 3\r\n\
ST: urn:schemas-upnp-org:device:test:1\r\n\r\n";
        let parsed = parse(payload).unwrap();
        match parsed {
            ParsedMessage::Search(SearchQuery { uuid: None, urn: Some(urn), mx: 3 }) => {
                assert_eq!(urn, "urn:schemas-upnp-org:device:test:1");
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        let payload = "NOTIFY * HTTP/1.1\r\nHOST: x\r\n\r\n";
        assert!(parse(payload).is_none());
    }

    #[test]
    fn compose_alive_round_trips_through_parse() {
        let composed = compose_alive(
            "239.255.255.250",
            1900,
            "test/1.0",
            1800,
            "http://192.168.1.1:49152/desc.xml",
            "ebf5a0a0-1dd1-11b2-a92f-e89f80eb7241",
            "urn:schemas-upnp-org:device:test:1",
        );
        let parsed = parse(&composed).unwrap();
        match parsed {
            ParsedMessage::Notify { uuid, urn, location } => {
                assert_eq!(uuid, "ebf5a0a0-1dd1-11b2-a92f-e89f80eb7241");
                assert_eq!(urn, "urn:schemas-upnp-org:device:test:1");
                assert_eq!(location.unwrap(), "http://192.168.1.1:49152/desc.xml");
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }
}
