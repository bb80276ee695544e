//! Per-connection settings and the bookkeeping kept next to each engine slot.

use std::collections::VecDeque;
use std::time::Duration;

use rusty_enet as enet;

/// Connection state, as driven by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Disconnected,
    Connecting,
    AcknowledgingConnect,
    ConnectionPending,
    ConnectionSucceeded,
    Connected,
    DisconnectLater,
    Disconnecting,
    AcknowledgingDisconnect,
    Zombie,
}

impl PeerState {
    pub fn is_connected(self) -> bool {
        matches!(self, PeerState::Connected | PeerState::DisconnectLater)
    }

    /// Handshake in progress: sends are held until the connect event.
    pub(crate) fn is_connecting(self) -> bool {
        matches!(
            self,
            PeerState::Connecting
                | PeerState::AcknowledgingConnect
                | PeerState::ConnectionPending
                | PeerState::ConnectionSucceeded
        )
    }
}

impl From<enet::PeerState> for PeerState {
    fn from(state: enet::PeerState) -> Self {
        match state {
            enet::PeerState::Disconnected => PeerState::Disconnected,
            enet::PeerState::Connecting => PeerState::Connecting,
            enet::PeerState::AcknowledgingConnect => PeerState::AcknowledgingConnect,
            enet::PeerState::ConnectionPending => PeerState::ConnectionPending,
            enet::PeerState::ConnectionSucceeded => PeerState::ConnectionSucceeded,
            enet::PeerState::Connected => PeerState::Connected,
            enet::PeerState::DisconnectLater => PeerState::DisconnectLater,
            enet::PeerState::Disconnecting => PeerState::Disconnecting,
            enet::PeerState::AcknowledgingDisconnect => PeerState::AcknowledgingDisconnect,
            enet::PeerState::Zombie => PeerState::Zombie,
        }
    }
}

/// Inactivity timeout parameters.
///
/// A connection times out once a reliable packet has gone unacknowledged for
/// `limit` retransmissions and at least `minimum`, or for `maximum` in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub limit: u32,
    pub minimum: Duration,
    pub maximum: Duration,
}

impl Default for Timeout {
    fn default() -> Self {
        Self {
            limit: enet::consts::PEER_TIMEOUT_LIMIT,
            minimum: Duration::from_millis(enet::consts::PEER_TIMEOUT_MINIMUM.into()),
            maximum: Duration::from_millis(enet::consts::PEER_TIMEOUT_MAXIMUM.into()),
        }
    }
}

impl Timeout {
    /// Zero fields replaced by their defaults.
    pub(crate) fn or_defaults(self) -> Self {
        let defaults = Self::default();
        Self {
            limit: if self.limit == 0 { defaults.limit } else { self.limit },
            minimum: if self.minimum.is_zero() {
                defaults.minimum
            } else {
                self.minimum
            },
            maximum: if self.maximum.is_zero() {
                defaults.maximum
            } else {
                self.maximum
            },
        }
    }
}

/// Packet throttle parameters: how fast the engine opens and closes its send
/// window in response to measured round-trip time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    pub interval: Duration,
    pub acceleration: u32,
    pub deceleration: u32,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(enet::consts::PEER_PACKET_THROTTLE_INTERVAL.into()),
            acceleration: enet::consts::PEER_PACKET_THROTTLE_ACCELERATION,
            deceleration: enet::consts::PEER_PACKET_THROTTLE_DECELERATION,
        }
    }
}

/// What the engine does not remember for us about one slot.
#[derive(Default)]
pub(crate) struct Slot {
    pub timeout: Timeout,
    pub throttle: Throttle,
    /// Sends accepted while the handshake runs, as (channel, packet).
    pub pending: VecDeque<(u8, enet::Packet)>,
    /// Bytes of received packets staged but not yet handed out.
    pub waiting_data: usize,
}

impl Slot {
    /// Back to defaults. Pending packets are released.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Whole milliseconds, saturating, for the engine's 32-bit timers.
pub(crate) fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_engine_constants() {
        let timeout = Timeout::default();
        assert_eq!(timeout.limit, 32);
        assert_eq!(timeout.minimum, Duration::from_secs(5));
        assert_eq!(timeout.maximum, Duration::from_secs(30));
        let throttle = Throttle::default();
        assert_eq!(throttle.interval, Duration::from_secs(5));
        assert_eq!((throttle.acceleration, throttle.deceleration), (2, 2));
    }

    #[test]
    fn zero_timeout_fields_take_defaults() {
        let timeout = Timeout {
            limit: 0,
            minimum: Duration::from_millis(10),
            maximum: Duration::ZERO,
        }
        .or_defaults();
        assert_eq!(timeout.limit, 32);
        assert_eq!(timeout.minimum, Duration::from_millis(10));
        assert_eq!(timeout.maximum, Duration::from_secs(30));
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u32::MAX);
    }

    #[test]
    fn reset_drops_pending_sends() {
        let mut slot = Slot::default();
        slot.pending
            .push_back((0, enet::Packet::reliable(&b"queued"[..])));
        slot.waiting_data = 6;
        slot.throttle.acceleration = 9;
        slot.reset();
        assert!(slot.pending.is_empty());
        assert_eq!(slot.waiting_data, 0);
        assert_eq!(slot.throttle, Throttle::default());
    }

    #[test]
    fn connected_states() {
        assert!(PeerState::Connected.is_connected());
        assert!(PeerState::DisconnectLater.is_connected());
        assert!(!PeerState::Disconnecting.is_connected());
        assert!(PeerState::ConnectionSucceeded.is_connecting());
        assert!(!PeerState::Connected.is_connecting());
        assert_eq!(
            PeerState::from(enet::PeerState::AcknowledgingDisconnect),
            PeerState::AcknowledgingDisconnect
        );
    }
}
