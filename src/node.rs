//! Node facade: fluent configuration, start/close lifecycle, and the
//! single place that wires the transport's receive loop to the
//! publisher and scanner cores.
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::content_cache::ContentCache;
use crate::http::DescriptionServer;
use crate::interface::{self, InterfaceInfo};
use crate::message::{self, Message, ParsedMessage};
use crate::publisher::PublisherCore;
use crate::scanner::{ScanCallback, Scanner, ScannerCore};
use crate::scheduler::Scheduler;
use crate::transport::MulticastTransport;

const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const DEFAULT_PORT: u16 = 1900;
const DEFAULT_TTL: u32 = 300;
const DEFAULT_MX: u32 = 5;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub multicast_address: Ipv4Addr,
    pub multicast_port: u16,
    pub http_port: Option<u16>,
    pub ttl: u32,
    pub mx: u32,
    pub say_byebye_on_close: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            multicast_address: DEFAULT_GROUP,
            multicast_port: DEFAULT_PORT,
            http_port: None,
            ttl: DEFAULT_TTL,
            mx: DEFAULT_MX,
            say_byebye_on_close: true,
        }
    }
}

impl NodeConfig {
    pub fn multicast_address(mut self, addr: Ipv4Addr) -> Self {
        self.multicast_address = addr;
        self
    }

    pub fn multicast_port(mut self, port: u16) -> Self {
        self.multicast_port = port;
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn mx(mut self, mx: u32) -> Self {
        self.mx = mx;
        self
    }

    pub fn say_byebye_on_close(mut self, value: bool) -> Self {
        self.say_byebye_on_close = value;
        self
    }
}

struct RunningState {
    transport: Arc<MulticastTransport>,
    scheduler: Arc<Scheduler>,
    publisher: Arc<PublisherCore>,
    scanner: Arc<ScannerCore>,
    content_cache: Arc<ContentCache>,
    http: Option<DescriptionServer>,
}

enum State {
    Configured,
    Running(RunningState),
    Closed,
}

pub struct Node {
    config: NodeConfig,
    server_string: String,
    state: RwLock<State>,
}

fn server_string() -> String {
    format!(
        "{}/{} UPnP/1.0 {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            server_string: server_string(),
            state: RwLock::new(State::Configured),
        }
    }

    /// Enumerates interfaces, opens the multicast transport, starts the
    /// description server (if configured) and the periodic announce
    /// task. Errors if already running.
    pub async fn start(&self) -> anyhow::Result<()> {
        let interfaces = interface::enumerate()?;
        self.start_on(interfaces).await
    }

    /// Like [`start`](Self::start), but binds to the given interfaces
    /// instead of auto-enumerating them. Exists so tests can run a full
    /// node over loopback, which `interface::enumerate` deliberately
    /// excludes.
    async fn start_on(&self, interfaces: Vec<InterfaceInfo>) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        anyhow::ensure!(matches!(*state, State::Configured), "node already started");

        let transport = Arc::new(
            MulticastTransport::bind(self.config.multicast_address, self.config.multicast_port, self.config.ttl, interfaces)
                .await?,
        );
        let scheduler = Arc::new(Scheduler::new());
        let publisher = Arc::new(PublisherCore::new(transport.clone(), scheduler.clone(), self.server_string.clone(), self.config.ttl));
        let scanner = Arc::new(ScannerCore::new(transport.clone(), scheduler.clone(), self.config.mx));
        let content_cache = Arc::new(ContentCache::new());

        let http = match self.config.http_port {
            Some(port) => Some(DescriptionServer::bind(port, content_cache.clone(), publisher.published()).await?),
            None => None,
        };

        {
            let publisher = publisher.clone();
            let scanner = scanner.clone();
            transport.spawn_receiver(move |from, data| {
                let publisher = publisher.clone();
                let scanner = scanner.clone();
                tokio::spawn(async move {
                    let Ok(payload) = std::str::from_utf8(&data) else {
                        return;
                    };
                    match message::parse(payload) {
                        Some(ParsedMessage::Search(query)) => {
                            publisher.handle_search(from, query).await;
                        }
                        Some(ParsedMessage::Notify { uuid, urn, location }) => {
                            scanner.handle_notify(uuid, urn, location).await;
                        }
                        Some(ParsedMessage::Response { uuid, urn, .. }) => {
                            scanner.handle_response(uuid, urn).await;
                        }
                        None => {
                            tracing::trace!(%from, "dropped unparseable ssdp payload");
                        }
                    }
                });
            });
        }

        {
            let publisher = publisher.clone();
            let ttl = self.config.ttl;
            scheduler.spawn_periodic(Duration::from_secs_f64(ttl as f64 * 0.333), move || {
                let publisher = publisher.clone();
                async move {
                    publisher.announce_all().await;
                }
            });
        }

        *state = State::Running(RunningState {
            transport,
            scheduler,
            publisher,
            scanner,
            content_cache,
            http,
        });
        Ok(())
    }

    /// Publishes `msg`, requiring `uuid`, `urn` and `location` all set.
    pub async fn publish(&self, msg: Message) -> anyhow::Result<()> {
        let state = self.state.read().await;
        let State::Running(running) = &*state else {
            anyhow::bail!("node is not running");
        };
        running.publisher.publish(msg).await
    }

    /// Withdraws every published message matching `query`.
    pub async fn withdraw(&self, query: Message) -> anyhow::Result<()> {
        let state = self.state.read().await;
        let State::Running(running) = &*state else {
            anyhow::bail!("node is not running");
        };
        running.publisher.withdraw(&query).await;
        Ok(())
    }

    pub async fn start_scan(&self, matcher: Message, callback: Box<dyn ScanCallback>) -> anyhow::Result<Scanner> {
        let state = self.state.read().await;
        let State::Running(running) = &*state else {
            anyhow::bail!("node is not running");
        };
        Ok(running.scanner.start_scan(matcher, callback).await)
    }

    /// Clears the description content cache.
    pub async fn reset(&self) -> anyhow::Result<()> {
        let state = self.state.read().await;
        let State::Running(running) = &*state else {
            anyhow::bail!("node is not running");
        };
        running.content_cache.reset().await;
        Ok(())
    }

    /// Stops the description server, cancels the announce task, emits
    /// byebye for published messages if configured to, and tears down
    /// the transport. A no-op if already closed.
    pub async fn close(&self) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        let running = match std::mem::replace(&mut *state, State::Closed) {
            State::Running(running) => running,
            State::Closed => {
                *state = State::Closed;
                return Ok(());
            }
            State::Configured => {
                *state = State::Closed;
                return Ok(());
            }
        };

        if let Some(http) = &running.http {
            http.close();
        }
        running.scheduler.close();
        if self.config.say_byebye_on_close {
            running.publisher.close().await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        running.transport.close();
        // idempotent: closing an already-closed description server is
        // harmless, matching the no-op re-close of an already-Closed node.
        if let Some(http) = &running.http {
            http.close();
        }
        Ok(())
    }
}
