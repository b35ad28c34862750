//! Holds the set of currently-published devices, answers M-SEARCH
//! requests with randomized delay, and announces alive/byebye.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;

use crate::message::{self, Message, SearchQuery};
use crate::scheduler::Scheduler;
use crate::transport::MulticastTransport;

pub struct PublisherCore {
    transport: Arc<MulticastTransport>,
    scheduler: Arc<Scheduler>,
    published: Arc<Mutex<Vec<Message>>>,
    server: String,
    ttl: u32,
}

/// Delay window for search replies: `clamp(mx*1000 - 500, 100, 4500)` ms.
fn reply_delay_bounds(mx: u32) -> (u64, u64) {
    let upper = (mx as i64 * 1000 - 500).clamp(100, 4500) as u64;
    (0, upper)
}

impl PublisherCore {
    pub fn new(transport: Arc<MulticastTransport>, scheduler: Arc<Scheduler>, server: String, ttl: u32) -> Self {
        Self {
            transport,
            scheduler,
            published: Arc::new(Mutex::new(Vec::new())),
            server,
            ttl,
        }
    }

    pub fn published(&self) -> Arc<Mutex<Vec<Message>>> {
        self.published.clone()
    }

    /// Publishes `msg`, replacing any existing entry that matches it in
    /// both directions, and immediately announces it as alive.
    pub async fn publish(&self, msg: Message) -> anyhow::Result<()> {
        anyhow::ensure!(msg.is_publishable(), "message must have uuid, urn and location to be published");
        {
            let mut set = self.published.lock().await;
            if let Some(existing) = set.iter_mut().find(|e| e.matches(&msg) && msg.matches(e)) {
                *existing = msg.clone();
            } else {
                set.push(msg.clone());
            }
        }
        self.announce_alive(&msg).await;
        Ok(())
    }

    /// Withdraws every published message matching `query`, sending one
    /// byebye per withdrawn message.
    pub async fn withdraw(&self, query: &Message) {
        let withdrawn: Vec<Message> = {
            let mut set = self.published.lock().await;
            let (removed, kept): (Vec<_>, Vec<_>) = set.drain(..).partition(|m| m.matches(query));
            *set = kept;
            removed
        };
        for msg in &withdrawn {
            self.announce_byebye(msg).await;
        }
    }

    async fn announce_alive(&self, msg: &Message) {
        let Some(location) = &msg.location else { return };
        let (Some(uuid), Some(urn)) = (&msg.uuid, &msg.urn) else {
            return;
        };
        let server = self.server.clone();
        let ttl = self.ttl;
        let group = self.transport.group.to_string();
        let port = self.transport.port;
        self.transport
            .send_alive_per_interface(|iface| {
                let url = location
                    .location_for(Some(port), iface)
                    .unwrap_or_else(|_| location.name().to_string());
                message::compose_alive(&group, port, &server, ttl, &url, uuid, urn)
            })
            .await;
    }

    async fn announce_byebye(&self, msg: &Message) {
        let (Some(uuid), Some(urn)) = (&msg.uuid, &msg.urn) else {
            return;
        };
        let group = self.transport.group.to_string();
        let port = self.transport.port;
        let dst = SocketAddr::new(self.transport.group.into(), port);
        let body = message::compose_byebye(&group, port, uuid, urn);
        self.transport.send_from_all(dst, &body).await;
    }

    /// Re-announces every published message; driven by the periodic
    /// scheduler task.
    pub async fn announce_all(&self) {
        let published = self.published.lock().await.clone();
        for msg in &published {
            self.announce_alive(msg).await;
        }
    }

    /// Handles an inbound M-SEARCH: for each published message matching
    /// the query, schedules a unicast reply after a randomized delay.
    pub async fn handle_search(&self, from: SocketAddr, query: SearchQuery) {
        let published = self.published.lock().await.clone();
        let matcher = query.as_message();
        let matches: Vec<Message> = published.into_iter().filter(|m| m.matches(&matcher)).collect();
        if matches.is_empty() {
            return;
        }

        let SocketAddr::V4(from_v4) = from else {
            return;
        };
        let Some(iface) = self.transport.interface_for(*from_v4.ip()) else {
            return;
        };

        for msg in matches {
            let (lower, upper) = reply_delay_bounds(query.mx);
            let delay_ms = if upper > lower {
                rand::rng().random_range(lower..upper)
            } else {
                lower
            };
            let server = self.server.clone();
            let ttl = self.ttl;
            let transport = self.transport.clone();
            let delay = Duration::from_millis(delay_ms);
            self.scheduler.spawn_once(delay, move || async move {
                let (Some(uuid), Some(urn), Some(location)) = (&msg.uuid, &msg.urn, &msg.location) else {
                    return;
                };
                let url = location
                    .location_for(Some(transport.port), &iface)
                    .unwrap_or_else(|_| location.name().to_string());
                let date = now_rfc1123();
                let body = message::compose_response(&server, ttl, &url, uuid, urn, &date);
                if let Err(e) = transport.send_unicast(from, &body).await {
                    tracing::warn!("failed to send search reply: {e}");
                }
            });
        }
    }

    /// Announces byebye for every published message; called from node
    /// close when configured to do so.
    pub async fn close(&self) {
        let published = self.published.lock().await.clone();
        for msg in &published {
            self.announce_byebye(msg).await;
        }
    }
}

fn now_rfc1123() -> String {
    let format = time::format_description::parse(
        "[weekday repr:short], [day padding:zero] [month repr:short] [year] [hour]:[minute]:[second] GMT",
    )
    .expect("static format description is valid");
    time::OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_delay_window_is_clamped() {
        assert_eq!(reply_delay_bounds(0), (0, 100));
        assert_eq!(reply_delay_bounds(1), (0, 500));
        assert_eq!(reply_delay_bounds(5), (0, 4500));
        assert_eq!(reply_delay_bounds(10), (0, 4500));
    }
}
