//! Minimal HTTP/1.1 responder serving description documents.
//!
//! Deliberately not built on a general-purpose framework: exactly one
//! resource per connection, two status codes, no keep-alive, no
//! chunked transfer, no HEAD/POST. The wire contract is small enough
//! that a framework would only get in the way.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::content_cache::ContentCache;
use crate::message::Message;

const READ_TIMEOUT: Duration = Duration::from_secs(1);

pub struct DescriptionServer {
    cancellation_token: CancellationToken,
}

impl DescriptionServer {
    pub async fn bind(
        port: u16,
        cache: Arc<ContentCache>,
        published: Arc<tokio::sync::Mutex<Vec<Message>>>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("bind description server on port {port}"))?;
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let cache = cache.clone();
                                let published = published.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, &cache, &published).await {
                                        tracing::warn!(%addr, "description connection failed: {e}");
                                    }
                                });
                            }
                            Err(e) => tracing::warn!("description server accept error: {e}"),
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::debug!("description server shutting down");
                        return;
                    }
                }
            }
        });

        Ok(Self { cancellation_token })
    }

    pub fn close(&self) {
        self.cancellation_token.cancel();
    }
}

async fn handle_connection(
    stream: TcpStream,
    cache: &ContentCache,
    published: &tokio::sync::Mutex<Vec<Message>>,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut request_line))
        .await
        .context("read timed out")??;

    let mut line = String::new();
    loop {
        line.clear();
        let n = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line))
            .await
            .context("read timed out")??;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .trim_start_matches('/')
        .to_string();

    let stream = reader.into_inner();
    respond(stream, cache, published, &path).await
}

async fn respond(
    mut stream: TcpStream,
    cache: &ContentCache,
    published: &tokio::sync::Mutex<Vec<Message>>,
    path: &str,
) -> anyhow::Result<()> {
    let published = published.lock().await.clone();
    let body = cache.get(path, &published).await;

    let response = match body {
        Some(bytes) => {
            let mut head = format!(
                "HTTP/1.1 200 OK\r\nconnection: close\r\ncontent-type: text/xml\r\ncontent-length: {}\r\n\r\n",
                bytes.len()
            )
            .into_bytes();
            head.extend_from_slice(&bytes);
            head
        }
        None => b"HTTP/1.1 404 NOT FOUND\r\nconnection: close\r\ncontent-length: 0\r\n\r\n".to_vec(),
    };

    stream.write_all(&response).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ConstDescriptor;

    #[tokio::test]
    async fn serves_known_resource_and_404s_unknown() {
        let cache = Arc::new(ContentCache::new());
        let published = Arc::new(tokio::sync::Mutex::new(vec![Message::new(
            "u",
            "urn:x",
            Arc::new(ConstDescriptor::new("device.xml", b"<xml/>".to_vec())),
            60,
        )]));

        let server = DescriptionServer::bind(48610, cache, published).await.unwrap();

        let ok = reqwest::get("http://127.0.0.1:48610/device.xml").await.unwrap();
        assert_eq!(ok.status(), reqwest::StatusCode::OK);
        assert_eq!(ok.bytes().await.unwrap().as_ref(), b"<xml/>");

        let missing = reqwest::get("http://127.0.0.1:48610/missing.xml").await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        server.close();
    }
}
