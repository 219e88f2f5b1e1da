//! UDP multicast stand-in for the LoRa transceiver.
//!
//! Every node on one link joins ff02::1 on a shared port. A datagram sent by
//! one node is heard by every other node on the link, which is as close to a
//! broadcast radio channel as a LAN gets. Frames are sent from an ephemeral
//! socket so a node can recognize, and ignore, its own transmissions when
//! multicast loopback delivers them back.

use std::collections::VecDeque;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use agromesh_core::wire::MAX_PACKET_LEN;
use agromesh_services::{Radio, RadioError};

pub const MULTICAST_ADDR: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// Frames received but not yet taken by the relay.
const INBOX_LIMIT: usize = 64;

/// Pause after a failed receive, multiplied by the run of consecutive failures.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);
const RECV_ERROR_BACKOFF_MAX: Duration = Duration::from_secs(1);

pub struct UdpRadio {
    tx: Socket,
    dest: SocketAddrV6,
    inbox: Arc<Mutex<VecDeque<Bytes>>>,
    rx: Arc<Notify>,
    listener: JoinHandle<()>,
}

impl UdpRadio {
    /// Open the channel on `interface`. Must be called inside a tokio runtime.
    pub fn open(interface: &str, port: u16) -> Result<Self> {
        let interface_index = if_index(interface)?;
        let tx = make_sender_socket(interface_index).context("failed to create radio send socket")?;
        let own = tx
            .local_addr()
            .context("send socket address")?
            .as_socket()
            .context("send socket is not an inet socket")?;
        let local = local_link_addr(interface_index, port)?;

        let listen = make_listener_socket(interface_index, port)
            .context("failed to create radio listen socket")?;
        let listen = UdpSocket::from_std(listen).context("failed to convert to tokio UdpSocket")?;

        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let rx = Arc::new(Notify::new());
        let listener = tokio::spawn(listen_loop(listen, local, own.port(), inbox.clone(), rx.clone()));

        tracing::info!(interface, interface_index, port, addr = %local, "udp radio open");

        Ok(Self {
            tx,
            dest: SocketAddrV6::new(MULTICAST_ADDR, port, 0, interface_index),
            inbox,
            rx,
            listener,
        })
    }
}

impl Drop for UdpRadio {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl Radio for UdpRadio {
    fn available(&mut self) -> bool {
        self.inbox.lock().map(|q| !q.is_empty()).unwrap_or(false)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        match self.tx.send_to(frame, &self.dest.into()) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(RadioError::Busy),
            Err(e) => Err(RadioError::Driver(e.to_string())),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.inbox.lock().ok()?.pop_front()?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Some(n)
    }

    fn rx_signal(&self) -> Arc<Notify> {
        self.rx.clone()
    }
}

async fn listen_loop(
    socket: UdpSocket,
    local: Ipv6Addr,
    own_port: u16,
    inbox: Arc<Mutex<VecDeque<Bytes>>>,
    rx: Arc<Notify>,
) {
    // One byte of slack so oversized datagrams are seen as such by the relay.
    let mut buf = [0u8; MAX_PACKET_LEN + 1];
    let mut failures = 0u32;
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(r) => {
                failures = 0;
                r
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let pause = recv_backoff(failures);
                tracing::warn!(error = %e, failures, pause_ms = pause.as_millis() as u64, "radio recv_from failed");
                tokio::time::sleep(pause).await;
                continue;
            }
        };

        if let SocketAddr::V6(v6) = peer {
            if *v6.ip() == local && v6.port() == own_port {
                tracing::trace!("ignoring own transmission");
                continue;
            }
        }

        let Ok(mut q) = inbox.lock() else {
            tracing::error!("radio inbox poisoned, listener stopping");
            return;
        };
        if q.len() >= INBOX_LIMIT {
            q.pop_front();
            tracing::debug!("radio inbox full, oldest frame dropped");
        }
        q.push_back(Bytes::copy_from_slice(&buf[..len]));
        drop(q);
        rx.notify_one();
    }
}

fn recv_backoff(consecutive_failures: u32) -> Duration {
    RECV_ERROR_BACKOFF
        .saturating_mul(consecutive_failures)
        .min(RECV_ERROR_BACKOFF_MAX)
}

/// Socket used only for transmitting to the group.
fn make_sender_socket(interface_index: u32) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_multicast_if_v6(interface_index).context("IPV6_MULTICAST_IF")?;
    // Link-local only, never routed.
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
    // Other nodes on the same host share the channel.
    socket.set_multicast_loop_v6(true).context("IPV6_MULTICAST_LOOP")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;
    Ok(socket)
}

/// Socket joined to the group on the shared channel port.
fn make_listener_socket(interface_index: u32, port: u16) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket
        .join_multicast_v6(&MULTICAST_ADDR, interface_index)
        .context("IPV6_JOIN_GROUP")?;

    Ok(socket.into())
}

/// The address the kernel picks as source for traffic to the group.
fn local_link_addr(interface_index: u32, port: u16) -> Result<Ipv6Addr> {
    let probe = std::net::UdpSocket::bind("[::]:0").context("probe bind")?;
    probe
        .connect(SocketAddrV6::new(MULTICAST_ADDR, port, 0, interface_index))
        .context("probe connect")?;
    match probe.local_addr()? {
        SocketAddr::V6(v6) => Ok(*v6.ip()),
        SocketAddr::V4(_) => anyhow::bail!("expected IPv6 local address"),
    }
}

/// OS interface index for a named network interface.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}
