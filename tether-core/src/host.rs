//! The host: owner of one engine endpoint, its peer registry, and the event loop.

use std::time::Duration;

use tracing::{debug, warn};

use crate::address::Address;
use crate::compress::Compressor;
use crate::config::HostConfig;
use crate::engine::{runtime, Bandwidth, EngineEvent, Endpoint, Statistics};
use crate::packet::Packet;
use crate::peer::{Peer, SendError};
use crate::registry::{PeerId, PeerInfo, PeerRegistry};

type ConnectCallback = Box<dyn FnMut(Peer<'_>, u32)>;
type DisconnectCallback = Box<dyn FnMut(PeerInfo, u32)>;
type ReceiveCallback = Box<dyn FnMut(Peer<'_>, Packet, u8)>;

/// State a [`Peer`] view borrows: the endpoint and the registry, without the
/// callbacks that are running while it exists.
pub(crate) struct HostCore {
    pub(crate) endpoint: Endpoint,
    pub(crate) registry: PeerRegistry,
}

#[derive(Default)]
struct Callbacks {
    connect: Option<ConnectCallback>,
    disconnect: Option<DisconnectCallback>,
    receive: Option<ReceiveCallback>,
}

/// One engine endpoint and the connections it manages.
///
/// All events surface through [`Host::service`], which runs the registered
/// callbacks on the calling thread. A host is driven by exactly one thread;
/// run several hosts for several threads.
pub struct Host {
    core: HostCore,
    callbacks: Callbacks,
}

impl Host {
    /// Client host on an ephemeral port on every interface.
    pub fn new(peer_limit: usize) -> Result<Self, HostError> {
        Self::open(None, peer_limit)
    }

    /// Host bound to `address`. `Address::any(port)` listens on every interface.
    pub fn bind(address: Address, peer_limit: usize) -> Result<Self, HostError> {
        Self::open(Some(address), peer_limit)
    }

    pub fn from_config(config: &HostConfig) -> crate::Result<Self> {
        let mut host = Self::open(config.bind_address()?, config.peer_limit)?;
        host.set_channel_limit(config.channel_limit);
        host.set_bandwidth_limit(Bandwidth {
            incoming: config.incoming_bandwidth,
            outgoing: config.outgoing_bandwidth,
        });
        host.set_maximum_packet_size(config.maximum_packet_size);
        host.set_maximum_waiting_data(config.maximum_waiting_data);
        host.set_duplicate_peers(config.duplicate_peers);
        Ok(host)
    }

    fn open(address: Option<Address>, peer_limit: usize) -> Result<Self, HostError> {
        let endpoint = Endpoint::open(address, peer_limit)?;
        Ok(Self {
            core: HostCore {
                endpoint,
                registry: PeerRegistry::with_capacity(peer_limit),
            },
            callbacks: Callbacks::default(),
        })
    }

    /// Number of hosts alive in the process.
    pub fn live_hosts() -> usize {
        runtime::live_hosts()
    }

    /// Address this host is bound to.
    pub fn address(&self) -> Address {
        self.core.endpoint.address()
    }

    pub fn peer_limit(&self) -> usize {
        self.core.endpoint.peer_limit()
    }

    /// Connect with as many channels as the channel limit allows.
    pub fn connect(&mut self, address: Address) -> Result<Peer<'_>, HostError> {
        let channels = self.core.endpoint.channel_limit();
        self.connect_with(address, channels, 0)
    }

    /// Start connecting to `address`. The peer is registered right away, but
    /// it is only established once the connect callback fires; packets sent
    /// before then are queued.
    pub fn connect_with(
        &mut self,
        address: Address,
        channel_count: u8,
        data: u32,
    ) -> Result<Peer<'_>, HostError> {
        let slot = self.core.endpoint.connect(address, channel_count, data)?;
        let id = PeerId::new(slot);
        self.core.registry.insert(id, address);
        Ok(Peer::new(&mut self.core, id))
    }

    /// Wait up to `timeout` for an event, then handle whatever else is ready
    /// without waiting again. Stops after `limit` events.
    ///
    /// Returns true when it stopped because of `limit` (more events may be
    /// pending), false when everything available was handled.
    pub fn service(&mut self, timeout: Duration, limit: Option<usize>) -> Result<bool, HostError> {
        if limit == Some(0) {
            return Ok(true);
        }
        let mut wait = timeout;
        let mut handled = 0;
        while let Some(event) = self.core.endpoint.service(wait)? {
            self.dispatch(event);
            handled += 1;
            if limit.is_some_and(|limit| handled >= limit) {
                return Ok(true);
            }
            wait = Duration::ZERO;
        }
        Ok(false)
    }

    /// [`Host::service`] without waiting.
    pub fn receive(&mut self, limit: Option<usize>) -> Result<bool, HostError> {
        self.service(Duration::ZERO, limit)
    }

    /// Queue `packet` for every connected peer. The packet is locked even if
    /// no peer is connected.
    pub fn broadcast(&mut self, packet: &mut Packet, channel: u8) -> Result<(), SendError> {
        self.core.endpoint.broadcast(packet, channel)
    }

    /// Send queued data now instead of on the next service call.
    pub fn flush(&mut self) {
        self.core.endpoint.flush();
    }

    /// Install a default-constructed `C` as the datagram compressor.
    pub fn set_compression<C>(&mut self)
    where
        C: Compressor + Default + 'static,
    {
        self.set_compressor(C::default());
    }

    pub fn set_compressor<C>(&mut self, compressor: C)
    where
        C: Compressor + 'static,
    {
        self.core.endpoint.set_compressor(Some(Box::new(compressor)));
    }

    pub fn disable_compression(&mut self) {
        self.core.endpoint.set_compressor(None);
    }

    pub fn is_compressing(&self) -> bool {
        self.core.endpoint.has_compressor()
    }

    pub fn on_connect<F>(&mut self, callback: F)
    where
        F: FnMut(Peer<'_>, u32) + 'static,
    {
        self.callbacks.connect = Some(Box::new(callback));
    }

    /// The callback gets the peer as it was registered; the registry entry is
    /// removed right after it returns.
    pub fn on_disconnect<F>(&mut self, callback: F)
    where
        F: FnMut(PeerInfo, u32) + 'static,
    {
        self.callbacks.disconnect = Some(Box::new(callback));
    }

    pub fn on_receive<F>(&mut self, callback: F)
    where
        F: FnMut(Peer<'_>, Packet, u8) + 'static,
    {
        self.callbacks.receive = Some(Box::new(callback));
    }

    /// Re-resolve a registered peer.
    pub fn peer(&mut self, id: PeerId) -> Option<Peer<'_>> {
        if self.core.registry.contains(id) {
            Some(Peer::new(&mut self.core, id))
        } else {
            None
        }
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.core.registry.iter()
    }

    pub fn peer_count(&self) -> usize {
        self.core.registry.len()
    }

    pub fn channel_limit(&self) -> u8 {
        self.core.endpoint.channel_limit()
    }

    /// Channel count used by [`Host::connect`] and granted to incoming
    /// connections at most. 0 selects the maximum (255).
    pub fn set_channel_limit(&mut self, limit: u8) {
        self.core.endpoint.set_channel_limit(limit);
    }

    pub fn bandwidth_limit(&self) -> Bandwidth {
        self.core.endpoint.bandwidth()
    }

    pub fn set_bandwidth_limit(&mut self, bandwidth: Bandwidth) {
        self.core.endpoint.set_bandwidth(bandwidth);
    }

    pub fn duplicate_peers(&self) -> usize {
        self.core.endpoint.duplicate_peers()
    }

    /// Most connections accepted from one remote host.
    pub fn set_duplicate_peers(&mut self, peers: usize) {
        self.core.endpoint.set_duplicate_peers(peers);
    }

    pub fn maximum_packet_size(&self) -> usize {
        self.core.endpoint.maximum_packet_size()
    }

    pub fn set_maximum_packet_size(&mut self, size: usize) {
        self.core.endpoint.set_maximum_packet_size(size);
    }

    pub fn maximum_waiting_data(&self) -> usize {
        self.core.endpoint.maximum_waiting_data()
    }

    pub fn set_maximum_waiting_data(&mut self, size: usize) {
        self.core.endpoint.set_maximum_waiting_data(size);
    }

    pub fn statistics(&self) -> Statistics {
        self.core.endpoint.statistics()
    }

    pub fn total_sent_data(&self) -> u32 {
        self.statistics().sent_data
    }

    pub fn total_sent_packets(&self) -> u32 {
        self.statistics().sent_packets
    }

    pub fn total_received_data(&self) -> u32 {
        self.statistics().received_data
    }

    pub fn total_received_packets(&self) -> u32 {
        self.statistics().received_packets
    }

    fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connect {
                slot,
                address,
                data,
            } => {
                let id = PeerId::new(slot);
                self.core.registry.insert(id, address);
                debug!(peer = %id, address = %address, "peer connected");
                if let Some(callback) = self.callbacks.connect.as_mut() {
                    callback(Peer::new(&mut self.core, id), data);
                }
            }
            EngineEvent::Receive {
                slot,
                channel,
                packet,
            } => {
                let id = PeerId::new(slot);
                if !self.core.registry.contains(id) {
                    warn!(peer = %id, "dropping packet for unregistered peer");
                    return;
                }
                if let Some(callback) = self.callbacks.receive.as_mut() {
                    callback(Peer::new(&mut self.core, id), packet, channel);
                }
            }
            EngineEvent::Disconnect { slot, data } => {
                let id = PeerId::new(slot);
                let Some(info) = self.core.registry.get(id).copied() else {
                    return;
                };
                if let Some(callback) = self.callbacks.disconnect.as_mut() {
                    callback(info, data);
                }
                self.core.registry.remove(id);
                debug!(peer = %id, data, "peer removed");
            }
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("endpoint", &self.core.endpoint)
            .field("peers", &self.core.registry.len())
            .finish()
    }
}

/// Failure of a host-level operation.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("engine initialization failed: {0}")]
    EngineInit(String),
    #[error("cannot connect to {address}: {reason}")]
    Connect {
        address: Address,
        reason: &'static str,
    },
    #[error("socket failure on {address}")]
    Service {
        address: Address,
        #[source]
        source: std::io::Error,
    },
}
