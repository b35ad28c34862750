//! Active scanners: each issues M-SEARCH requests for a uuid/urn
//! filter and dispatches matching replies, NOTIFY alive and byebye to
//! a registered callback.
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::message::{self, Message};
use crate::scheduler::Scheduler;
use crate::transport::MulticastTransport;

/// Runs a user callback, turning a panic into a logged warning instead
/// of taking down the receive task that invoked it.
fn invoke(label: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(label, "scan callback panicked");
    }
}

/// Callbacks run on the transport's receive task; implementations that
/// do non-trivial work should hand it off (e.g. `tokio::spawn`) rather
/// than blocking the caller.
pub trait ScanCallback: Send + Sync {
    fn on_message_received(&self, scanner: &Scanner, reply: bool, search_id: i64);
    fn on_message_byebye(&self, scanner: &Scanner, search_id: i64);
    fn on_search_timed_out(&self, scanner: &Scanner, search_id: i64);
}

struct ScannerInner {
    matcher: Message,
    callback: Box<dyn ScanCallback>,
    current_search_id: AtomicI64,
    transport: Arc<MulticastTransport>,
    scheduler: Arc<Scheduler>,
    mx: u32,
}

/// A handle to an active scan. Cloning shares the same underlying
/// state; `close()` removes it from the owning node.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
    scanners: Arc<Mutex<Vec<Arc<ScannerInner>>>>,
}

impl Scanner {
    pub fn matcher(&self) -> &Message {
        &self.inner.matcher
    }

    pub fn current_search_id(&self) -> i64 {
        self.inner.current_search_id.load(Ordering::SeqCst)
    }

    /// Issues an M-SEARCH for this scanner's matcher if it is currently
    /// idle. Returns `true` iff `search_id` is now the active search.
    /// A call while a search is already outstanding is a no-op unless
    /// `search_id` happens to already be the active one.
    pub fn search(&self, search_id: i64) -> bool {
        let current = self.inner.current_search_id.load(Ordering::SeqCst);
        if current == search_id {
            return true;
        }
        if self
            .inner
            .current_search_id
            .compare_exchange(-1, search_id, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let group = self.inner.transport.group.to_string();
        let port = self.inner.transport.port;
        let uuid = self.inner.matcher.uuid.clone();
        let urn = self.inner.matcher.urn.clone();
        let mx = self.inner.mx;
        let dst = std::net::SocketAddr::new(self.inner.transport.group.into(), port);
        let transport = self.inner.transport.clone();
        tokio::spawn(async move {
            let body = message::compose_search(&group, port, uuid.as_deref(), urn.as_deref(), mx);
            transport.send_from_all(dst, &body).await;
        });

        let inner = self.inner.clone();
        let scanner = self.clone();
        self.inner.scheduler.spawn_once(Duration::from_secs(mx as u64), move || async move {
            if inner
                .current_search_id
                .compare_exchange(search_id, -1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                invoke("on_search_timed_out", || inner.callback.on_search_timed_out(&scanner, search_id));
            }
        });

        true
    }

    /// Removes this scanner from the node; no further callbacks fire.
    pub async fn close(&self) {
        let mut scanners = self.scanners.lock().await;
        scanners.retain(|s| !Arc::ptr_eq(s, &self.inner));
    }
}

pub struct ScannerCore {
    transport: Arc<MulticastTransport>,
    scheduler: Arc<Scheduler>,
    scanners: Arc<Mutex<Vec<Arc<ScannerInner>>>>,
    mx: u32,
}

impl ScannerCore {
    pub fn new(transport: Arc<MulticastTransport>, scheduler: Arc<Scheduler>, mx: u32) -> Self {
        Self {
            transport,
            scheduler,
            scanners: Arc::new(Mutex::new(Vec::new())),
            mx,
        }
    }

    pub async fn start_scan(&self, matcher: Message, callback: Box<dyn ScanCallback>) -> Scanner {
        let inner = Arc::new(ScannerInner {
            matcher,
            callback,
            current_search_id: AtomicI64::new(-1),
            transport: self.transport.clone(),
            scheduler: self.scheduler.clone(),
            mx: self.mx,
        });
        self.scanners.lock().await.push(inner.clone());
        Scanner {
            inner,
            scanners: self.scanners.clone(),
        }
    }

    /// Dispatches a parsed NOTIFY to every scanner whose matcher matches.
    pub async fn handle_notify(&self, uuid: String, urn: String, location: Option<String>) {
        let candidate = Message::query(Some(uuid), Some(urn));
        let scanners = self.scanners.lock().await.clone();
        for inner in scanners {
            if !candidate.matches(&inner.matcher) {
                continue;
            }
            let search_id = inner.current_search_id.load(Ordering::SeqCst);
            let scanner = Scanner {
                inner: inner.clone(),
                scanners: self.scanners.clone(),
            };
            if location.is_some() {
                invoke("on_message_received", || inner.callback.on_message_received(&scanner, false, search_id));
            } else {
                invoke("on_message_byebye", || inner.callback.on_message_byebye(&scanner, search_id));
            }
        }
    }

    /// Dispatches a parsed unicast HTTP/1.1 search response to every
    /// scanner whose matcher matches.
    pub async fn handle_response(&self, uuid: String, urn: String) {
        let candidate = Message::query(Some(uuid), Some(urn));
        let scanners = self.scanners.lock().await.clone();
        for inner in scanners {
            if !candidate.matches(&inner.matcher) {
                continue;
            }
            let search_id = inner.current_search_id.load(Ordering::SeqCst);
            let scanner = Scanner {
                inner: inner.clone(),
                scanners: self.scanners.clone(),
            };
            invoke("on_message_received", || inner.callback.on_message_received(&scanner, true, search_id));
        }
    }
}
