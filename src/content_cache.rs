//! Lazily-populated cache of description bytes, keyed by resource name
//! (the path component of a `LocationDescriptor`). A fetch failure is
//! cached as a negative result so a repeatedly-requested missing
//! resource never re-triggers `content()`.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::location::LocationDescriptor;
use crate::message::Message;

enum CacheEntry {
    Hit(Arc<Vec<u8>>),
    Missing,
    /// Another task is already fetching this key; waiters subscribe to
    /// `notify` and re-check the map once it fires rather than calling
    /// `content()` a second time.
    InFlight(Arc<Notify>),
}

#[derive(Default)]
pub struct ContentCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the description bytes for `name`, populating the cache
    /// on first request by scanning `published` for a matching
    /// [`LocationDescriptor`]. `None` means "no such resource" and is
    /// itself cached. Concurrent requests for the same uncached `name`
    /// serialize on the first request's fetch rather than each calling
    /// `content()`.
    pub async fn get(&self, name: &str, published: &[Message]) -> Option<Arc<Vec<u8>>> {
        let notify = loop {
            let mut entries = self.entries.lock().await;
            match entries.get(name) {
                Some(CacheEntry::Hit(bytes)) => return Some(bytes.clone()),
                Some(CacheEntry::Missing) => return None,
                Some(CacheEntry::InFlight(notify)) => {
                    let notify = notify.clone();
                    drop(entries);
                    notify.notified().await;
                    continue;
                }
                None => {
                    let notify = Arc::new(Notify::new());
                    entries.insert(name.to_string(), CacheEntry::InFlight(notify.clone()));
                    break notify;
                }
            }
        };

        let descriptor = published
            .iter()
            .filter_map(|m| m.location.as_ref())
            .find(|l| l.name() == name)
            .cloned();

        let entry = match descriptor {
            Some(descriptor) => match descriptor.content().await {
                Ok(bytes) => CacheEntry::Hit(Arc::new(bytes)),
                Err(e) => {
                    tracing::warn!(name, "failed to fetch description content: {e}");
                    CacheEntry::Missing
                }
            },
            None => CacheEntry::Missing,
        };

        let result = match &entry {
            CacheEntry::Hit(bytes) => Some(bytes.clone()),
            CacheEntry::Missing => None,
            CacheEntry::InFlight(_) => unreachable!("content() never produces an in-flight entry"),
        };
        self.entries.lock().await.insert(name.to_string(), entry);
        notify.notify_waiters();
        result
    }

    pub async fn reset(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ConstDescriptor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    #[tokio::test]
    async fn caches_hit_and_miss() {
        let cache = ContentCache::new();
        let published = vec![Message::new(
            "u",
            "urn:x",
            StdArc::new(ConstDescriptor::new("d.xml", b"<xml/>".to_vec())),
            60,
        )];

        let hit = cache.get("d.xml", &published).await;
        assert_eq!(hit.as_deref(), Some(&b"<xml/>".to_vec()));

        let miss = cache.get("missing.xml", &published).await;
        assert!(miss.is_none());

        // a second miss must not rescan (nothing to assert on directly,
        // but it must still return None without panicking)
        let miss_again = cache.get("missing.xml", &published).await;
        assert!(miss_again.is_none());
    }

    #[tokio::test]
    async fn reset_clears_cache() {
        let cache = ContentCache::new();
        let published = vec![Message::new(
            "u",
            "urn:x",
            StdArc::new(ConstDescriptor::new("d.xml", b"<xml/>".to_vec())),
            60,
        )];
        cache.get("d.xml", &published).await;
        cache.reset().await;
        let hit = cache.get("d.xml", &published).await;
        assert!(hit.is_some());
    }

    #[derive(Debug)]
    struct CountingDescriptor {
        name: String,
        calls: StdArc<AtomicUsize>,
    }

    #[async_trait]
    impl LocationDescriptor for CountingDescriptor {
        fn name(&self) -> &str {
            &self.name
        }

        async fn content(&self) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(b"body".to_vec())
        }
    }

    #[tokio::test]
    async fn concurrent_requests_single_flight() {
        let calls = StdArc::new(AtomicUsize::new(0));
        let cache = ContentCache::new();
        let published = vec![Message::new(
            "u",
            "urn:x",
            StdArc::new(CountingDescriptor { name: "d.xml".into(), calls: calls.clone() }),
            60,
        )];

        let (a, b) = tokio::join!(cache.get("d.xml", &published), cache.get("d.xml", &published));

        assert_eq!(a.as_deref(), Some(&b"body".to_vec()));
        assert_eq!(b.as_deref(), Some(&b"body".to_vec()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
