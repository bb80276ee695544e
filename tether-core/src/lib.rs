//! Connection-oriented session layer over the ENet reliable UDP engine.
//! A [`Host`] owns one UDP endpoint and surfaces connect, receive and
//! disconnect events through callbacks run by [`Host::service`].

pub mod address;
pub mod compress;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod packet;
pub mod peer;
pub mod registry;

pub use address::{Address, AddressError, HOST_ANY, HOST_BROADCAST, HOST_LOCALHOST, PORT_ANY};
pub use compress::Compressor;
pub use config::{ConfigError, HostConfig};
pub use engine::{Bandwidth, Statistics};
pub use error::{Error, Result};
pub use host::{Host, HostError};
pub use packet::{DestroyHook, Ownership, Packet, PacketError, PacketFlags};
pub use peer::{Peer, PeerState, SendError, Throttle, Timeout};
pub use registry::{PeerId, PeerInfo};
