//! Multicast transport: one receive socket bound to the SSDP group,
//! plus one send socket per local interface.
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::Context;
use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::interface::InterfaceInfo;

pub struct InterfaceSender {
    pub info: InterfaceInfo,
    socket: Arc<UdpSocket>,
}

pub struct MulticastTransport {
    pub group: Ipv4Addr,
    pub port: u16,
    receiver: Arc<UdpSocket>,
    senders: Vec<InterfaceSender>,
    cancellation_token: CancellationToken,
}

fn bind_receiver(group: Ipv4Addr, port: u16, interfaces: &[InterfaceInfo]) -> anyhow::Result<UdpSocket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("create multicast receive socket")?;
    socket.set_reuse_address(true)?;
    #[cfg(target_os = "linux")]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
    for iface in interfaces {
        socket
            .join_multicast_v4(&group, &iface.addr)
            .with_context(|| format!("join multicast group on {}", iface.addr))?;
    }
    UdpSocket::from_std(socket.into()).context("convert receive socket to tokio")
}

fn bind_sender(iface: &InterfaceInfo, ttl: u32) -> anyhow::Result<UdpSocket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .with_context(|| format!("create send socket for {}", iface.addr))?;
    socket.set_nonblocking(true)?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_if_v4(&iface.addr)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(iface.addr, 0)).into())?;
    UdpSocket::from_std(socket.into()).with_context(|| format!("convert send socket for {}", iface.addr))
}

fn spawn_socket_loop(socket: Arc<UdpSocket>, token: CancellationToken, on_packet: Arc<dyn Fn(SocketAddr, Vec<u8>) + Send + Sync>) {
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => on_packet(from, buf[..len].to_vec()),
                        Err(e) => tracing::warn!("socket receive error: {e}"),
                    }
                }
                _ = token.cancelled() => {
                    tracing::debug!("receive loop cancelled");
                    return;
                }
            }
        }
    });
}

impl MulticastTransport {
    pub async fn bind(group: Ipv4Addr, port: u16, ttl: u32, interfaces: Vec<InterfaceInfo>) -> anyhow::Result<Self> {
        let receiver = bind_receiver(group, port, &interfaces)?;
        let mut senders = Vec::with_capacity(interfaces.len());
        for info in interfaces {
            let socket = bind_sender(&info, ttl)?;
            senders.push(InterfaceSender { info, socket: Arc::new(socket) });
        }
        Ok(Self {
            group,
            port,
            receiver: Arc::new(receiver),
            senders,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceInfo> {
        self.senders.iter().map(|s| &s.info)
    }

    /// Spawns one receive loop per socket this transport owns: the
    /// shared multicast-group socket plus every per-interface sender
    /// socket. A search reply is a unicast datagram addressed back to
    /// the ephemeral port an M-SEARCH was sent from (`send_from_all`
    /// uses the interface's sender socket), so that socket must also be
    /// read, not just the multicast one. Every datagram, from whichever
    /// socket, is handed to the same `on_packet` dispatcher.
    pub fn spawn_receiver<F>(&self, on_packet: F)
    where
        F: Fn(SocketAddr, Vec<u8>) + Send + Sync + 'static,
    {
        let on_packet = Arc::new(on_packet);
        spawn_socket_loop(self.receiver.clone(), self.cancellation_token.clone(), on_packet.clone());
        for sender in &self.senders {
            spawn_socket_loop(sender.socket.clone(), self.cancellation_token.clone(), on_packet.clone());
        }
    }

    /// Sends `body` from every interface whose subnet contains `dst`
    /// (always true for multicast destinations). Per-interface failures
    /// are logged and do not abort the fan-out to remaining interfaces.
    pub async fn send_from_all(&self, dst: SocketAddr, body: &str) {
        for sender in &self.senders {
            let SocketAddr::V4(dst_v4) = dst else {
                continue;
            };
            if !sender.info.matches(*dst_v4.ip()) {
                continue;
            }
            if let Err(e) = sender.socket.send_to(body.as_bytes(), dst).await {
                tracing::warn!(interface = %sender.info.addr, "failed to send on interface: {e}");
            }
        }
    }

    /// Sends `body` as a unicast reply from the receiving interface's
    /// socket so the source address lines up with the group membership.
    pub async fn send_unicast(&self, dst: SocketAddr, body: &str) -> anyhow::Result<()> {
        self.receiver
            .send_to(body.as_bytes(), dst)
            .await
            .context("send unicast reply")?;
        Ok(())
    }

    /// Sends one multicast message per interface, where the message
    /// body depends on the interface (used for alive announcements,
    /// whose LOCATION is interface-specific).
    pub async fn send_alive_per_interface<F>(&self, mut compose: F)
    where
        F: FnMut(&InterfaceInfo) -> String,
    {
        let dst = SocketAddr::V4(SocketAddrV4::new(self.group, self.port));
        for sender in &self.senders {
            let body = compose(&sender.info);
            if let Err(e) = sender.socket.send_to(body.as_bytes(), dst).await {
                tracing::warn!(interface = %sender.info.addr, "failed to send on interface: {e}");
            }
        }
    }

    /// The interface whose subnet contains `addr`, falling back to the
    /// first configured interface, used to pick a LOCATION for unicast
    /// search replies.
    pub fn interface_for(&self, addr: Ipv4Addr) -> Option<InterfaceInfo> {
        self.senders
            .iter()
            .find(|s| s.info.matches(addr))
            .or_else(|| self.senders.first())
            .map(|s| s.info)
    }

    pub fn close(&self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn wait_for(slot: &Mutex<Option<(SocketAddr, Vec<u8>)>>) -> (SocketAddr, Vec<u8>) {
        for _ in 0..50 {
            if let Some(v) = slot.lock().unwrap().clone() {
                return v;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for packet");
    }

    /// A unicast reply to an M-SEARCH is addressed back to the
    /// ephemeral port the search was sent from (a sender socket, not
    /// the shared multicast receiver), so that socket must also run a
    /// receive loop or the reply is silently dropped by the OS.
    #[tokio::test]
    async fn sender_socket_receives_unicast_reply() {
        let group = Ipv4Addr::new(239, 255, 255, 250);
        let port = 19301;
        let iface = InterfaceInfo::new(Ipv4Addr::LOCALHOST, 8);

        let scanner = MulticastTransport::bind(group, port, 4, vec![iface]).await.unwrap();
        let publisher = MulticastTransport::bind(group, port, 4, vec![iface]).await.unwrap();

        let publisher_seen = Arc::new(Mutex::new(None));
        let seen = publisher_seen.clone();
        publisher.spawn_receiver(move |from, data| {
            *seen.lock().unwrap() = Some((from, data));
        });

        let scanner_seen = Arc::new(Mutex::new(None));
        let seen = scanner_seen.clone();
        scanner.spawn_receiver(move |from, data| {
            *seen.lock().unwrap() = Some((from, data));
        });

        let dst = SocketAddr::V4(SocketAddrV4::new(group, port));
        scanner.send_from_all(dst, "M-SEARCH").await;

        let (search_from, _) = wait_for(&publisher_seen).await;
        publisher.send_unicast(search_from, "REPLY").await.unwrap();

        let (_, reply_body) = wait_for(&scanner_seen).await;
        assert_eq!(reply_body, b"REPLY");
    }
}
