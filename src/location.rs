//! Sources of device description content.
//!
//! A published message carries a [`LocationDescriptor`] rather than raw
//! bytes: the actual description document might be a compiled-in
//! constant, a file on disk, or fetched from a remote URL. The node
//! only ever sees `name()`, `location_for()`, and `content()`.
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

use crate::interface::InterfaceInfo;

#[async_trait]
pub trait LocationDescriptor: std::fmt::Debug + Send + Sync {
    /// Path component this description is served under, e.g. `device.xml`.
    fn name(&self) -> &str;

    /// Absolute URL a remote control point should fetch this description
    /// from. `http_port` is `None` when the node was not configured with
    /// a description server, which is a usage error for any descriptor
    /// that needs to synthesize a local URL.
    fn location_for(&self, http_port: Option<u16>, iface: &InterfaceInfo) -> anyhow::Result<String> {
        let port = http_port.context("location requested but node has no http port configured")?;
        Ok(format!("http://{}:{}/{}", iface.addr, port, self.name()))
    }

    async fn content(&self) -> anyhow::Result<Vec<u8>>;
}

/// Constant, compiled-in description bytes.
#[derive(Debug, Clone)]
pub struct ConstDescriptor {
    name: String,
    bytes: Vec<u8>,
}

impl ConstDescriptor {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl LocationDescriptor for ConstDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn content(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

/// Description content read from a local file on every request.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    name: String,
    path: PathBuf,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl LocationDescriptor for FileDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn content(&self) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("read description file {}", self.path.display()))
    }
}

/// Description content fetched from a remote HTTP(S) URL on every request.
#[derive(Debug, Clone)]
pub struct UrlDescriptor {
    name: String,
    url: String,
}

impl UrlDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl LocationDescriptor for UrlDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn location_for(&self, _http_port: Option<u16>, _iface: &InterfaceInfo) -> anyhow::Result<String> {
        Ok(self.url.clone())
    }

    async fn content(&self) -> anyhow::Result<Vec<u8>> {
        let response = reqwest::get(&self.url)
            .await
            .with_context(|| format!("fetch description from {}", self.url))?
            .error_for_status()
            .with_context(|| format!("description url returned an error status: {}", self.url))?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Picks a concrete descriptor from a loosely-typed input string.
///
/// - contains `://` and no newline -> [`UrlDescriptor`]
/// - starts with `<?xml` or contains a newline -> [`ConstDescriptor`]
/// - otherwise -> [`FileDescriptor`], treating the input as a file path
pub fn from_str(name: impl Into<String>, input: &str) -> Box<dyn LocationDescriptor> {
    let name = name.into();
    if input.contains("://") && !input.contains('\n') {
        Box::new(UrlDescriptor::new(name, input))
    } else if input.starts_with("<?xml") || input.contains('\n') {
        Box::new(ConstDescriptor::new(name, input.as_bytes().to_vec()))
    } else {
        Box::new(FileDescriptor::new(name, input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_url() {
        let d = from_str("d.xml", "http://example.com/d.xml");
        assert_eq!(d.name(), "d.xml");
    }

    #[tokio::test]
    async fn const_descriptor_roundtrips_bytes() {
        let d = ConstDescriptor::new("d.xml", b"<xml/>".to_vec());
        assert_eq!(d.content().await.unwrap(), b"<xml/>");
    }

    #[test]
    fn picks_inline_over_file() {
        let d = from_str("d.xml", "<?xml version=\"1.0\"?><root/>");
        assert_eq!(d.name(), "d.xml");
    }
}
