//! Crate-level error, for callers that want one type across modules.

use crate::address::AddressError;
use crate::config::ConfigError;
use crate::host::HostError;
use crate::packet::PacketError;
use crate::peer::SendError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
