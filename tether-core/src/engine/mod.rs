//! Transport engine binding: one ENet host over a UDP socket.
//!
//! ENet runs the protocol (handshake, acknowledgement, retransmission,
//! fragmentation, throttling, timeouts). This module keeps what ENet leaves to
//! its caller: sends held until a handshake completes, events staged for pull
//! receive, and the host-wide limits ENet does not expose.

pub mod connection;
pub(crate) mod runtime;
mod socket;

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rusty_enet as enet;
use tracing::{debug, trace, warn};

use crate::address::{Address, PORT_ANY};
use crate::compress::{Compressor, SharedCompressor};
use crate::host::HostError;
use crate::packet::{Packet, PacketError, PacketFlags};
use crate::peer::SendError;

use connection::{millis, PeerState, Slot, Throttle, Timeout};
use runtime::EngineGuard;
use socket::CountingSocket;

pub(crate) type EnginePeer = enet::Peer<CountingSocket>;

/// Highest number of connection slots one endpoint may have.
pub const MAXIMUM_PEER_ID: usize = enet::PeerID::MAX;
pub const MAXIMUM_CHANNEL_COUNT: u8 = enet::consts::PROTOCOL_MAXIMUM_CHANNEL_COUNT as u8;
/// Also the ceiling: the engine refuses anything larger.
pub const DEFAULT_MAXIMUM_PACKET_SIZE: usize = enet::consts::HOST_DEFAULT_MAXIMUM_PACKET_SIZE as usize;
pub const DEFAULT_MAXIMUM_WAITING_DATA: usize = enet::consts::HOST_DEFAULT_MAXIMUM_WAITING_DATA as usize;
pub const DEFAULT_DUPLICATE_PEERS: usize = MAXIMUM_PEER_ID;

/// Poll period of `service` while nothing is ready.
const SERVICE_TICK: Duration = Duration::from_millis(1);

/// Bandwidth in bytes per second; 0 means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Bandwidth {
    pub incoming: u32,
    pub outgoing: u32,
}

/// Endpoint traffic counters, in UDP datagrams and payload bytes. They wrap
/// like the engine's 32-bit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub sent_data: u32,
    pub sent_packets: u32,
    pub received_data: u32,
    pub received_packets: u32,
}

#[derive(Debug)]
pub(crate) enum EngineEvent {
    Connect {
        slot: u16,
        address: Address,
        data: u32,
    },
    Disconnect {
        slot: u16,
        data: u32,
    },
    Receive {
        slot: u16,
        channel: u8,
        packet: Packet,
    },
}

impl EngineEvent {
    fn slot(&self) -> u16 {
        match self {
            EngineEvent::Connect { slot, .. }
            | EngineEvent::Disconnect { slot, .. }
            | EngineEvent::Receive { slot, .. } => *slot,
        }
    }
}

pub(crate) struct Endpoint {
    host: enet::Host<CountingSocket>,
    address: Address,
    slots: Vec<Slot>,
    staged: VecDeque<EngineEvent>,
    maximum_packet_size: usize,
    maximum_waiting_data: usize,
    duplicate_peers: usize,
    compressor: SharedCompressor,
    _guard: EngineGuard,
}

impl Endpoint {
    /// Bind a UDP socket and start an engine host with `peer_limit` slots on
    /// it. `None` binds an ephemeral port on every interface.
    pub fn open(address: Option<Address>, peer_limit: usize) -> Result<Self, HostError> {
        if peer_limit == 0 || peer_limit > MAXIMUM_PEER_ID {
            return Err(HostError::EngineInit(format!(
                "peer limit {peer_limit} outside 1..={MAXIMUM_PEER_ID}"
            )));
        }
        let requested = address.unwrap_or(Address::any(PORT_ANY));
        let socket = UdpSocket::bind(SocketAddr::from(requested))
            .map_err(|err| HostError::EngineInit(format!("cannot bind {requested}: {err}")))?;
        let socket = CountingSocket::new(socket);
        let address = socket
            .local_addr()
            .map_err(|err| HostError::EngineInit(err.to_string()))
            .and_then(|bound| {
                Address::try_from(bound).map_err(|err| HostError::EngineInit(err.to_string()))
            })?;

        let guard = EngineGuard::acquire();
        let compressor = SharedCompressor::default();
        let settings = enet::HostSettings {
            peer_limit,
            channel_limit: usize::from(MAXIMUM_CHANNEL_COUNT),
            compressor: Some(Box::new(compressor.clone())),
            ..Default::default()
        };
        let host = enet::Host::new(socket, settings)
            .map_err(|err| HostError::EngineInit(format!("{err} ({err:?})")))?;
        debug!(address = %address, peer_limit, "endpoint bound");
        Ok(Self {
            host,
            address,
            slots: (0..peer_limit).map(|_| Slot::default()).collect(),
            staged: VecDeque::new(),
            maximum_packet_size: DEFAULT_MAXIMUM_PACKET_SIZE,
            maximum_waiting_data: DEFAULT_MAXIMUM_WAITING_DATA,
            duplicate_peers: DEFAULT_DUPLICATE_PEERS,
            compressor,
            _guard: guard,
        })
    }

    /// Local address of the socket.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn peer_limit(&self) -> usize {
        self.host.peer_limit()
    }

    /// Read one slot; `None` for a slot this endpoint does not have.
    pub fn inspect<T>(&self, slot: u16, read: impl FnOnce(&EnginePeer, &Slot) -> T) -> Option<T> {
        let peer = self.host.get_peer(peer_id(slot))?;
        let local = self.slots.get(usize::from(slot))?;
        Some(read(peer, local))
    }

    fn update(&mut self, slot: u16, write: impl FnOnce(&mut EnginePeer, &mut Slot)) {
        let local = self.slots.get_mut(usize::from(slot));
        let peer = self.host.get_peer_mut(peer_id(slot));
        if let (Some(peer), Some(local)) = (peer, local) {
            write(peer, local);
        }
    }

    pub fn channel_limit(&self) -> u8 {
        u8::try_from(self.host.channel_limit()).unwrap_or(MAXIMUM_CHANNEL_COUNT)
    }

    /// 0 selects the maximum.
    pub fn set_channel_limit(&mut self, limit: u8) {
        let limit = if limit == 0 { MAXIMUM_CHANNEL_COUNT } else { limit };
        if let Err(err) = self.host.set_channel_limit(usize::from(limit)) {
            warn!(limit, error = ?err, "channel limit refused");
        }
    }

    pub fn bandwidth(&self) -> Bandwidth {
        let (incoming, outgoing) = self.host.bandwidth_limit();
        Bandwidth {
            incoming: incoming.unwrap_or(0),
            outgoing: outgoing.unwrap_or(0),
        }
    }

    /// The engine announces new limits to connected peers on its next
    /// bandwidth throttle tick.
    pub fn set_bandwidth(&mut self, bandwidth: Bandwidth) {
        let limit = |value: u32| (value != 0).then_some(value);
        if let Err(err) = self
            .host
            .set_bandwidth_limit(limit(bandwidth.incoming), limit(bandwidth.outgoing))
        {
            warn!(?bandwidth, error = ?err, "bandwidth limit refused");
        }
    }

    pub fn maximum_packet_size(&self) -> usize {
        self.maximum_packet_size
    }

    /// Clamped to what the engine accepts.
    pub fn set_maximum_packet_size(&mut self, size: usize) {
        if size > DEFAULT_MAXIMUM_PACKET_SIZE {
            debug!(size, ceiling = DEFAULT_MAXIMUM_PACKET_SIZE, "maximum packet size clamped");
        }
        self.maximum_packet_size = size.min(DEFAULT_MAXIMUM_PACKET_SIZE);
    }

    pub fn maximum_waiting_data(&self) -> usize {
        self.maximum_waiting_data
    }

    pub fn set_maximum_waiting_data(&mut self, size: usize) {
        self.maximum_waiting_data = size.min(DEFAULT_MAXIMUM_WAITING_DATA);
    }

    pub fn duplicate_peers(&self) -> usize {
        self.duplicate_peers
    }

    pub fn set_duplicate_peers(&mut self, peers: usize) {
        self.duplicate_peers = peers.clamp(1, MAXIMUM_PEER_ID);
    }

    pub fn statistics(&self) -> Statistics {
        self.host.socket().statistics()
    }

    pub fn set_compressor(&mut self, compressor: Option<Box<dyn Compressor>>) {
        self.compressor.replace(compressor);
    }

    pub fn has_compressor(&self) -> bool {
        self.compressor.is_installed()
    }

    /// Start an outbound connection. The slot is `Connecting` on return.
    pub fn connect(&mut self, address: Address, channel_count: u8, data: u32) -> Result<u16, HostError> {
        if address.is_any() || address.port() == PORT_ANY {
            return Err(HostError::Connect {
                address,
                reason: "address must name a host and a port",
            });
        }
        let peer = self
            .host
            .connect(SocketAddr::from(address), usize::from(channel_count), data)
            .map_err(|_| HostError::Connect {
                address,
                reason: "no free connection slot",
            })?;
        let slot = slot_of(peer.id());
        debug!(peer = slot, address = %address, channels = peer.channel_count(), "connect requested");
        if let Some(local) = self.slots.get_mut(usize::from(slot)) {
            local.reset();
        }
        Ok(slot)
    }

    /// Queue `packet` on connection `slot`, locking it. While the handshake
    /// runs the packet is held and handed to the engine on the connect event.
    pub fn send(&mut self, slot: u16, packet: &mut Packet, channel: u8) -> Result<(), SendError> {
        if packet.is_locked() {
            return Err(SendError::Packet(PacketError::Locked));
        }
        let peer = self
            .host
            .get_peer_mut(peer_id(slot))
            .ok_or(SendError::NotConnected(PeerState::Disconnected))?;
        let state = PeerState::from(peer.state());
        if state != PeerState::Connected && !state.is_connecting() {
            return Err(SendError::NotConnected(state));
        }
        let channel_count = channel_count_of(peer);
        if channel >= channel_count {
            return Err(SendError::ChannelOutOfRange {
                channel,
                channel_count,
            });
        }
        check_size(packet, self.maximum_packet_size)?;

        let outgoing = hand_over(packet)?;
        if state == PeerState::Connected {
            peer.send(channel, &outgoing).map_err(SendError::Rejected)?;
            trace!(peer = slot, channel, len = packet.len(), "packet queued");
        } else if let Some(local) = self.slots.get_mut(usize::from(slot)) {
            local.pending.push_back((channel, outgoing));
            trace!(peer = slot, channel, len = packet.len(), "packet held until connected");
        }
        Ok(())
    }

    /// Queue `packet` on every connected peer that has `channel`.
    pub fn broadcast(&mut self, packet: &mut Packet, channel: u8) -> Result<(), SendError> {
        if packet.is_locked() {
            return Err(SendError::Packet(PacketError::Locked));
        }
        check_size(packet, self.maximum_packet_size)?;
        let outgoing = hand_over(packet)?;
        self.host.broadcast(channel, &outgoing);
        trace!(channel, len = packet.len(), "packet broadcast");
        Ok(())
    }

    /// Take the oldest staged packet of `slot` without going through the
    /// event callback.
    pub fn receive(&mut self, slot: u16) -> Option<(u8, Packet)> {
        self.stage_ready();
        let position = self
            .staged
            .iter()
            .position(|event| matches!(event, EngineEvent::Receive { slot: s, .. } if *s == slot))?;
        let Some(EngineEvent::Receive { channel, packet, .. }) = self.staged.remove(position) else {
            return None;
        };
        self.release(slot, packet.len());
        Some((channel, packet))
    }

    pub fn ping(&mut self, slot: u16) {
        self.update(slot, |peer, _| peer.ping());
    }

    /// Graceful disconnect. Returns true when the slot was reset on the spot
    /// (the connection was never established), false when a disconnect event
    /// will follow.
    pub fn disconnect(&mut self, slot: u16, data: u32) -> bool {
        let Some(peer) = self.host.get_peer_mut(peer_id(slot)) else {
            return false;
        };
        match PeerState::from(peer.state()) {
            PeerState::Disconnected
            | PeerState::Disconnecting
            | PeerState::AcknowledgingDisconnect
            | PeerState::Zombie => return false,
            _ => {}
        }
        peer.disconnect(data);
        let reset = PeerState::from(peer.state()) == PeerState::Disconnected;
        self.discard_received(slot);
        if reset {
            self.reset_slot(slot);
            debug!(peer = slot, "connection abandoned before it was established");
        } else {
            if let Some(local) = self.slots.get_mut(usize::from(slot)) {
                local.pending.clear();
            }
            debug!(peer = slot, "disconnect requested");
        }
        reset
    }

    /// Notify the remote side without waiting for it, then reset the slot.
    pub fn disconnect_now(&mut self, slot: u16, data: u32) {
        self.update(slot, |peer, _| {
            if peer.state() != enet::PeerState::Disconnected {
                peer.disconnect_now(data);
            }
        });
        self.forget(slot);
        debug!(peer = slot, "disconnected immediately");
    }

    /// Disconnect once every queued outgoing packet has been sent. Same
    /// return value as [`Endpoint::disconnect`].
    pub fn disconnect_later(&mut self, slot: u16, data: u32) -> bool {
        let Some(peer) = self.host.get_peer_mut(peer_id(slot)) else {
            return false;
        };
        if !PeerState::from(peer.state()).is_connected() {
            return self.disconnect(slot, data);
        }
        peer.disconnect_later(data);
        if peer.state() != enet::PeerState::DisconnectLater {
            self.discard_received(slot);
        }
        false
    }

    /// Forget the connection without telling the remote side.
    pub fn reset_connection(&mut self, slot: u16) {
        self.update(slot, |peer, _| peer.reset());
        self.forget(slot);
    }

    /// Push every queued command and packet to the network.
    pub fn flush(&mut self) {
        self.host.flush();
    }

    pub fn set_ping_interval(&mut self, slot: u16, interval: Duration) {
        self.update(slot, |peer, _| peer.set_ping_interval(millis(interval)));
    }

    pub fn set_timeout(&mut self, slot: u16, timeout: Timeout) {
        let timeout = timeout.or_defaults();
        self.update(slot, |peer, local| {
            peer.set_timeout(timeout.limit, millis(timeout.minimum), millis(timeout.maximum));
            local.timeout = timeout;
        });
    }

    pub fn set_throttle(&mut self, slot: u16, throttle: Throttle) {
        self.update(slot, |peer, local| {
            peer.set_throttle(millis(throttle.interval), throttle.acceleration, throttle.deceleration);
            local.throttle = throttle;
        });
    }

    /// Wait up to `timeout` for the next event.
    pub fn service(&mut self, timeout: Duration) -> Result<Option<EngineEvent>, HostError> {
        let deadline = Instant::now() + timeout;
        let address = self.address;
        loop {
            if let Some(event) = self.next_staged() {
                return Ok(Some(event));
            }
            let event = match self.host.service() {
                Ok(event) => event.map(enet::Event::no_ref),
                Err(source) => return Err(HostError::Service { address, source }),
            };
            match event {
                Some(event) => {
                    self.stage(event);
                    self.stage_ready();
                }
                None => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep((deadline - now).min(SERVICE_TICK));
                }
            }
        }
    }

    fn next_staged(&mut self) -> Option<EngineEvent> {
        let event = self.staged.pop_front()?;
        if let EngineEvent::Receive { slot, packet, .. } = &event {
            self.release(*slot, packet.len());
        }
        Some(event)
    }

    /// Move events the engine has already dispatched into the staging queue.
    /// No socket I/O.
    fn stage_ready(&mut self) {
        while let Some(event) = self.host.check_events() {
            let event = event.no_ref();
            self.stage(event);
        }
    }

    fn stage(&mut self, event: enet::EventNoRef) {
        match event {
            enet::EventNoRef::Connect { peer, data } => self.stage_connect(peer, data),
            enet::EventNoRef::Disconnect { peer, data } => {
                let slot = slot_of(peer);
                self.reset_slot(slot);
                debug!(peer = slot, data, "disconnect delivered");
                self.staged.push_back(EngineEvent::Disconnect { slot, data });
            }
            enet::EventNoRef::Receive {
                peer,
                channel_id,
                packet,
            } => {
                let slot = slot_of(peer);
                let len = packet.data().len();
                let Some(local) = self.slots.get_mut(peer.0) else {
                    return;
                };
                if local.waiting_data + len > self.maximum_waiting_data {
                    warn!(peer = slot, waiting = local.waiting_data, len, "dropping packet, receive buffer full");
                    return;
                }
                local.waiting_data += len;
                let flags = PacketFlags::from_kind(packet.kind());
                let received = Packet::received(Bytes::copy_from_slice(packet.data()), flags);
                trace!(peer = slot, channel = channel_id, len, "packet received");
                self.staged.push_back(EngineEvent::Receive {
                    slot,
                    channel: channel_id,
                    packet: received,
                });
            }
        }
    }

    fn stage_connect(&mut self, id: enet::PeerID, data: u32) {
        let slot = slot_of(id);
        let Some(address) = self.remote_address(id) else {
            warn!(peer = slot, "connected peer has no IPv4 address, resetting");
            self.reset_connection(slot);
            return;
        };
        let duplicates = (0..self.host.peer_limit())
            .filter(|&index| index != id.0)
            .filter_map(|index| self.host.get_peer(enet::PeerID(index)))
            .filter(|peer| {
                peer.state() != enet::PeerState::Disconnected
                    && self.remote_address(peer.id()).map(|a| a.host()) == Some(address.host())
            })
            .count();
        if duplicates >= self.duplicate_peers {
            warn!(peer = slot, from = %address, duplicates, "refusing connection over the duplicate peer limit");
            self.disconnect_now(slot, 0);
            return;
        }

        let pending = self
            .slots
            .get_mut(id.0)
            .map(|local| std::mem::take(&mut local.pending))
            .unwrap_or_default();
        if let Some(peer) = self.host.get_peer_mut(id) {
            for (channel, packet) in pending {
                if let Err(err) = peer.send(channel, &packet) {
                    warn!(peer = slot, channel, error = %err, "dropping held packet");
                }
            }
        }
        debug!(peer = slot, address = %address, "connection established");
        self.staged.push_back(EngineEvent::Connect {
            slot,
            address,
            data,
        });
    }

    fn remote_address(&self, id: enet::PeerID) -> Option<Address> {
        let address = self.host.get_peer(id)?.address()?;
        Address::try_from(address).ok()
    }

    fn release(&mut self, slot: u16, len: usize) {
        if let Some(local) = self.slots.get_mut(usize::from(slot)) {
            local.waiting_data = local.waiting_data.saturating_sub(len);
        }
    }

    /// Drop staged packets of `slot`; the engine has cleared its own queues.
    fn discard_received(&mut self, slot: u16) {
        self.staged
            .retain(|event| !matches!(event, EngineEvent::Receive { slot: s, .. } if *s == slot));
        if let Some(local) = self.slots.get_mut(usize::from(slot)) {
            local.waiting_data = 0;
        }
    }

    /// Drop everything staged for `slot` and return it to defaults.
    fn forget(&mut self, slot: u16) {
        self.staged.retain(|event| event.slot() != slot);
        self.reset_slot(slot);
    }

    fn reset_slot(&mut self, slot: u16) {
        if let Some(local) = self.slots.get_mut(usize::from(slot)) {
            local.reset();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        debug!(address = %self.address, "endpoint closed");
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("peer_limit", &self.slots.len())
            .field("staged", &self.staged.len())
            .field("compression", &self.compressor.is_installed())
            .finish()
    }
}

fn peer_id(slot: u16) -> enet::PeerID {
    enet::PeerID(usize::from(slot))
}

/// Engine peer ids stay below [`MAXIMUM_PEER_ID`], so they fit.
fn slot_of(id: enet::PeerID) -> u16 {
    id.0 as u16
}

pub(crate) fn channel_count_of(peer: &EnginePeer) -> u8 {
    u8::try_from(peer.channel_count()).unwrap_or(MAXIMUM_CHANNEL_COUNT)
}

fn check_size(packet: &Packet, maximum: usize) -> Result<(), SendError> {
    if packet.len() > maximum {
        return Err(SendError::TooLarge {
            len: packet.len(),
            maximum,
        });
    }
    Ok(())
}

/// Lock `packet` and wrap its buffer for the engine. The engine holds the only
/// reference to the buffer, so the destroy hook runs when it releases it.
fn hand_over(packet: &mut Packet) -> Result<enet::Packet, PacketError> {
    let buffer = packet.lock()?;
    let kind = buffer.flags().kind();
    Ok(enet::Packet::new(Box::new(buffer), kind))
}
