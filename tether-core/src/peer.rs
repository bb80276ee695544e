//! Connection-scoped view handed out by a [`Host`](crate::Host).

use std::time::Duration;

use rusty_enet::error::PeerSendError;

use crate::address::Address;
use crate::engine::connection::Slot;
use crate::engine::{channel_count_of, EnginePeer};
use crate::host::HostCore;
use crate::packet::{Packet, PacketError};
use crate::registry::PeerId;

pub use crate::engine::connection::{PeerState, Throttle, Timeout};

/// One connection of a host.
///
/// A `Peer` borrows its host mutably, so it cannot outlive the callback or
/// call that produced it. Keep the [`PeerId`] and re-resolve with
/// [`Host::peer`](crate::Host::peer) instead.
pub struct Peer<'h> {
    core: &'h mut HostCore,
    id: PeerId,
}

impl<'h> Peer<'h> {
    /// Value of [`Peer::packet_loss`] when every packet is lost.
    pub const PACKET_LOSS_SCALE: u32 = rusty_enet::consts::PEER_PACKET_LOSS_SCALE;

    pub(crate) fn new(core: &'h mut HostCore, id: PeerId) -> Self {
        debug_assert!(id.index() < core.endpoint.peer_limit());
        Self { core, id }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    fn read<T: Default>(&self, read: impl FnOnce(&EnginePeer, &Slot) -> T) -> T {
        self.core
            .endpoint
            .inspect(self.id.slot(), read)
            .unwrap_or_default()
    }

    /// Remote endpoint of this connection.
    pub fn address(&self) -> Address {
        let remote = self.read(|peer, _| peer.address().and_then(|a| Address::try_from(a).ok()));
        remote
            .or_else(|| self.core.registry.get(self.id).map(|info| info.address()))
            .unwrap_or_default()
    }

    pub fn state(&self) -> PeerState {
        self.core
            .endpoint
            .inspect(self.id.slot(), |peer, _| PeerState::from(peer.state()))
            .unwrap_or(PeerState::Disconnected)
    }

    pub fn channel_count(&self) -> u8 {
        self.read(|peer, _| channel_count_of(peer))
    }

    /// Queue `packet` on `channel`. On success the packet is locked: the
    /// engine owns its buffer and it can no longer be modified or resent.
    /// While the handshake is still running the packet is held and goes out
    /// once the connection is established.
    pub fn send(&mut self, packet: &mut Packet, channel: u8) -> Result<(), SendError> {
        self.core.endpoint.send(self.id.slot(), packet, channel)
    }

    /// Take one already-buffered packet, if any, bypassing the event callback.
    pub fn receive<F>(&mut self, callback: F) -> bool
    where
        F: FnOnce(Packet, u8),
    {
        match self.core.endpoint.receive(self.id.slot()) {
            Some((channel, packet)) => {
                callback(packet, channel);
                true
            }
            None => false,
        }
    }

    /// Graceful disconnect. The disconnect event follows once the remote side
    /// acknowledges.
    pub fn disconnect(self, data: u32) {
        if self.core.endpoint.disconnect(self.id.slot(), data) {
            self.core.registry.remove(self.id);
        }
    }

    /// Disconnect after every queued outgoing packet has gone out.
    pub fn disconnect_later(self, data: u32) {
        if self.core.endpoint.disconnect_later(self.id.slot(), data) {
            self.core.registry.remove(self.id);
        }
    }

    /// Notify the remote side and forget the connection at once. No
    /// disconnect event is delivered locally.
    pub fn disconnect_now(self, data: u32) {
        self.core.endpoint.disconnect_now(self.id.slot(), data);
        self.core.registry.remove(self.id);
    }

    /// Hard reset: the remote side is not told and will time out.
    pub fn drop_connection(self) {
        self.core.endpoint.reset_connection(self.id.slot());
        self.core.registry.remove(self.id);
    }

    pub fn ping(&mut self) {
        self.core.endpoint.ping(self.id.slot());
    }

    pub fn ping_interval(&self) -> Duration {
        self.read(|peer, _| peer.ping_interval())
    }

    /// Zero restores the default interval.
    pub fn set_ping_interval(&mut self, interval: Duration) {
        self.core.endpoint.set_ping_interval(self.id.slot(), interval);
    }

    pub fn timeout(&self) -> Timeout {
        self.read(|_, local| local.timeout)
    }

    /// Zero fields fall back to their defaults.
    pub fn set_timeout(&mut self, timeout: Timeout) {
        self.core.endpoint.set_timeout(self.id.slot(), timeout);
    }

    pub fn throttle(&self) -> Throttle {
        self.read(|_, local| local.throttle)
    }

    pub fn set_throttle(&mut self, throttle: Throttle) {
        self.core.endpoint.set_throttle(self.id.slot(), throttle);
    }

    /// Smoothed round-trip time.
    pub fn round_trip_time(&self) -> Duration {
        self.read(|peer, _| peer.round_trip_time())
    }

    /// Mean packet loss as a fraction of [`Peer::PACKET_LOSS_SCALE`].
    pub fn packet_loss(&self) -> u32 {
        self.read(|peer, _| peer.packet_loss())
    }

    /// Incoming bandwidth announced by the remote side, bytes per second.
    pub fn incoming_bandwidth(&self) -> u32 {
        self.read(|peer, _| peer.incoming_bandwidth())
    }

    /// Outgoing bandwidth announced by the remote side, bytes per second.
    pub fn outgoing_bandwidth(&self) -> u32 {
        self.read(|peer, _| peer.outgoing_bandwidth())
    }
}

impl std::fmt::Debug for Peer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}

/// Error queueing a packet on a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("channel {channel} out of range, connection has {channel_count}")]
    ChannelOutOfRange { channel: u8, channel_count: u8 },
    #[error("packet of {len} bytes exceeds the {maximum} byte limit")]
    TooLarge { len: usize, maximum: usize },
    #[error("connection is not established (state {0:?})")]
    NotConnected(PeerState),
    #[error("engine refused the packet")]
    Rejected(#[source] PeerSendError),
}
