//! UPnP 1.0 discovery and description.
//!
//! A node can publish devices over SSDP multicast (and serve their
//! description documents over HTTP), scan for devices by issuing
//! M-SEARCH requests, or do both at once.
pub mod content_cache;
pub mod http;
pub mod interface;
pub mod location;
pub mod message;
pub mod node;
pub mod publisher;
pub mod scanner;
pub mod scheduler;
pub mod transport;
pub mod urn;

pub use location::LocationDescriptor;
pub use message::Message;
pub use node::{Node, NodeConfig};
pub use scanner::{ScanCallback, Scanner};
