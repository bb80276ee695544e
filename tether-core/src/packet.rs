//! Transmission units: one application message with delivery flags and an
//! explicit ownership state.
//!
//! A packet starts out `Owned` (its own buffer) or as an `UnmanagedView` over a
//! caller-supplied shared buffer. Handing it to `Peer::send` or
//! `Host::broadcast` moves the buffer into the engine and leaves the packet
//! `Locked`: still readable, never again writable or sendable. Packets
//! delivered by a receive event are `Locked` from the start.

use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;
use rusty_enet::PacketKind;

bitflags! {
    /// Delivery flags of a packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u8 {
        /// Delivered, and delivered in order on its channel.
        const RELIABLE = 0b0000_0001;
        /// Delivered without sequencing; may overtake earlier packets.
        const UNSEQUENCED = 0b0000_0010;
        /// The buffer is a shared view the packet never copies or resizes.
        const UNMANAGED = 0b0000_0100;
        /// Unreliable packet that may be split into fragments by the engine.
        const FRAGMENT = 0b0000_1000;
        /// Plain unreliable delivery. Marker only, the engine never sees it.
        const UNRELIABLE = 0b1000_0000;
    }
}

impl PacketFlags {
    /// Check a requested flag set for contradictions.
    pub fn validate(self) -> Result<Self, PacketError> {
        if self.is_empty() {
            return Err(PacketError::InvalidFlags("flags cannot be empty"));
        }
        if self.contains(Self::RELIABLE) {
            if self.contains(Self::UNSEQUENCED) {
                return Err(PacketError::InvalidFlags(
                    "unsequenced packet cannot be reliable",
                ));
            }
            if self.contains(Self::FRAGMENT) {
                return Err(PacketError::InvalidFlags(
                    "fragmented packets override reliability",
                ));
            }
            if self.contains(Self::UNRELIABLE) {
                return Err(PacketError::InvalidFlags(
                    "packet is either reliable or unreliable",
                ));
            }
        }
        Ok(self)
    }

    /// Delivery mode the engine sends these flags with.
    pub(crate) fn kind(self) -> PacketKind {
        let sequenced = !self.contains(Self::UNSEQUENCED);
        if self.contains(Self::RELIABLE) {
            PacketKind::Reliable
        } else if self.contains(Self::FRAGMENT) {
            PacketKind::AlwaysUnreliable { sequenced }
        } else {
            PacketKind::Unreliable { sequenced }
        }
    }

    /// Flags of a packet the engine delivered as `kind`.
    pub(crate) fn from_kind(kind: PacketKind) -> Self {
        match kind {
            PacketKind::Reliable => Self::RELIABLE,
            PacketKind::AlwaysUnreliable { sequenced: true } => Self::FRAGMENT,
            PacketKind::AlwaysUnreliable { sequenced: false } => Self::FRAGMENT | Self::UNSEQUENCED,
            PacketKind::Unreliable { sequenced: true } => Self::UNRELIABLE,
            PacketKind::Unreliable { sequenced: false } => Self::UNSEQUENCED,
        }
    }
}

/// Callback run once when the engine reclaims a sent packet's buffer.
pub type DestroyHook = Box<dyn FnOnce(&[u8], PacketFlags) + Send>;

/// Ownership state of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    Owned,
    UnmanagedView,
    Locked,
}

/// Buffer handed to the engine by a send. The engine owns it alone and drops
/// it when it releases the packet, which runs the destroy hook.
pub(crate) struct EngineBuffer {
    data: Bytes,
    flags: PacketFlags,
    on_destroy: Option<DestroyHook>,
}

impl EngineBuffer {
    pub(crate) fn flags(&self) -> PacketFlags {
        self.flags
    }
}

impl AsRef<[u8]> for EngineBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for EngineBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuffer")
            .field("len", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

impl Drop for EngineBuffer {
    fn drop(&mut self) {
        if let Some(hook) = self.on_destroy.take() {
            hook(&self.data, self.flags);
        }
    }
}

enum Buffer {
    Owned(Vec<u8>),
    Unmanaged(Bytes),
    /// Read-only view; never keeps the engine's buffer (or its hook) alive.
    Locked(Bytes),
}

/// One discrete application message.
pub struct Packet {
    buffer: Buffer,
    flags: PacketFlags,
    on_destroy: Option<DestroyHook>,
}

impl Packet {
    /// Copy `data` into a new owned packet.
    ///
    /// `UNMANAGED` is rejected here: an unmanaged packet wraps a shared buffer,
    /// see [`Packet::unmanaged`].
    pub fn new(data: &[u8], flags: PacketFlags) -> Result<Self, PacketError> {
        let flags = flags.validate()?;
        if flags.contains(PacketFlags::UNMANAGED) {
            return Err(PacketError::InvalidFlags(
                "unmanaged packets wrap a shared buffer",
            ));
        }
        Ok(Self {
            buffer: Buffer::Owned(data.to_vec()),
            flags,
            on_destroy: None,
        })
    }

    /// Wrap `buffer` without copying it. `UNMANAGED` is implied.
    pub fn unmanaged(buffer: Bytes, flags: PacketFlags) -> Result<Self, PacketError> {
        let flags = flags.union(PacketFlags::UNMANAGED).validate()?;
        Ok(Self {
            buffer: Buffer::Unmanaged(buffer),
            flags,
            on_destroy: None,
        })
    }

    /// Zero-filled owned packet of `size` bytes, for filling in place.
    pub fn with_size(size: usize, flags: PacketFlags) -> Result<Self, PacketError> {
        let mut packet = Self::new(&[], flags)?;
        packet.resize(size)?;
        Ok(packet)
    }

    pub(crate) fn received(data: Bytes, flags: PacketFlags) -> Self {
        Self {
            buffer: Buffer::Locked(data),
            flags,
            on_destroy: None,
        }
    }

    /// Owned copy of this packet's bytes and delivery flags. This is the only
    /// way to send a received packet on.
    pub fn duplicate(&self) -> Result<Self, PacketError> {
        let mut flags = self.flags.difference(PacketFlags::UNMANAGED);
        if flags.is_empty() {
            flags = PacketFlags::UNRELIABLE;
        }
        Self::new(self.data(), flags)
    }

    pub fn data(&self) -> &[u8] {
        match &self.buffer {
            Buffer::Owned(data) => data,
            Buffer::Unmanaged(data) => data,
            Buffer::Locked(data) => data,
        }
    }

    pub fn data_mut(&mut self) -> Result<&mut [u8], PacketError> {
        Ok(self.owned_buffer()?.as_mut_slice())
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn ownership(&self) -> Ownership {
        match self.buffer {
            Buffer::Owned(_) => Ownership::Owned,
            Buffer::Unmanaged(_) => Ownership::UnmanagedView,
            Buffer::Locked(_) => Ownership::Locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.ownership() == Ownership::Locked
    }

    /// Replace the contents with `data`.
    pub fn assign(&mut self, data: &[u8]) -> Result<(), PacketError> {
        let buffer = self.owned_buffer()?;
        buffer.clear();
        buffer.extend_from_slice(data);
        Ok(())
    }

    /// Concatenate `data` after the current contents.
    pub fn append(&mut self, data: &[u8]) -> Result<(), PacketError> {
        self.owned_buffer()?.extend_from_slice(data);
        Ok(())
    }

    /// Grow (zero-filled) or truncate to `size` bytes.
    pub fn resize(&mut self, size: usize) -> Result<(), PacketError> {
        self.owned_buffer()?.resize(size, 0);
        Ok(())
    }

    pub fn set_flags(&mut self, flags: PacketFlags) -> Result<(), PacketError> {
        match self.buffer {
            Buffer::Locked(_) => return Err(PacketError::Locked),
            Buffer::Unmanaged(_) => return Err(PacketError::FlagImmutable),
            Buffer::Owned(_) => {}
        }
        if flags.contains(PacketFlags::UNMANAGED) {
            return Err(PacketError::FlagImmutable);
        }
        self.flags = flags.validate()?;
        Ok(())
    }

    /// Attach a hook run once when the engine reclaims this packet's buffer
    /// after it has been sent. The hook may run long after `send` returns.
    pub fn on_destroy<F>(&mut self, hook: F) -> Result<(), PacketError>
    where
        F: FnOnce(&[u8], PacketFlags) + Send + 'static,
    {
        self.owned_buffer()?;
        self.on_destroy = Some(Box::new(hook));
        Ok(())
    }

    /// Transfer the buffer and the destroy hook to the engine. After this the
    /// packet is `Locked`.
    pub(crate) fn lock(&mut self) -> Result<EngineBuffer, PacketError> {
        let data = match std::mem::replace(&mut self.buffer, Buffer::Owned(Vec::new())) {
            Buffer::Owned(data) => Bytes::from(data),
            Buffer::Unmanaged(data) => data,
            Buffer::Locked(data) => {
                self.buffer = Buffer::Locked(data);
                return Err(PacketError::Locked);
            }
        };
        self.buffer = Buffer::Locked(data.clone());
        Ok(EngineBuffer {
            data,
            flags: self.flags,
            on_destroy: self.on_destroy.take(),
        })
    }

    fn owned_buffer(&mut self) -> Result<&mut Vec<u8>, PacketError> {
        match &mut self.buffer {
            Buffer::Owned(data) => Ok(data),
            Buffer::Unmanaged(_) => Err(PacketError::Unmanaged),
            Buffer::Locked(_) => Err(PacketError::Locked),
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("flags", &self.flags)
            .field("ownership", &self.ownership())
            .field("on_destroy", &self.on_destroy.is_some())
            .finish()
    }
}

/// Misuse of a packet: bad flags or mutation in the wrong ownership state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("invalid packet flags: {0}")]
    InvalidFlags(&'static str),
    #[error("flags of an unmanaged packet cannot be changed")]
    FlagImmutable,
    #[error("packet is locked: its buffer belongs to the engine")]
    Locked,
    #[error("packet data is an unmanaged view and cannot be modified")]
    Unmanaged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn empty_flags_rejected() {
        assert!(matches!(
            Packet::new(b"x", PacketFlags::empty()),
            Err(PacketError::InvalidFlags(_))
        ));
    }

    #[test]
    fn contradictory_flags_rejected() {
        for flags in [
            PacketFlags::RELIABLE | PacketFlags::UNSEQUENCED,
            PacketFlags::RELIABLE | PacketFlags::FRAGMENT,
            PacketFlags::RELIABLE | PacketFlags::UNRELIABLE,
        ] {
            assert!(matches!(
                Packet::new(b"x", flags),
                Err(PacketError::InvalidFlags(_))
            ));
        }
        assert!(Packet::new(b"x", PacketFlags::UNSEQUENCED | PacketFlags::FRAGMENT).is_ok());
    }

    #[test]
    fn new_copies_and_is_owned() {
        let source = b"hello".to_vec();
        let packet = Packet::new(&source, PacketFlags::RELIABLE).unwrap();
        assert_eq!(packet.data(), b"hello");
        assert_eq!(packet.len(), 5);
        assert_eq!(packet.ownership(), Ownership::Owned);
    }

    #[test]
    fn unmanaged_flag_needs_shared_buffer() {
        assert!(matches!(
            Packet::new(b"x", PacketFlags::UNMANAGED),
            Err(PacketError::InvalidFlags(_))
        ));
        let shared = Bytes::from_static(b"static payload");
        let packet = Packet::unmanaged(shared.clone(), PacketFlags::RELIABLE).unwrap();
        assert_eq!(packet.ownership(), Ownership::UnmanagedView);
        assert!(packet.flags().contains(PacketFlags::UNMANAGED));
        assert_eq!(packet.data().as_ptr(), shared.as_ptr());
    }

    #[test]
    fn unmanaged_rejects_mutation() {
        let mut packet = Packet::unmanaged(Bytes::from_static(b"abc"), PacketFlags::UNRELIABLE).unwrap();
        assert_eq!(packet.set_flags(PacketFlags::RELIABLE), Err(PacketError::FlagImmutable));
        assert_eq!(packet.assign(b"x"), Err(PacketError::Unmanaged));
        assert_eq!(packet.append(b"x"), Err(PacketError::Unmanaged));
        assert_eq!(packet.resize(10), Err(PacketError::Unmanaged));
        assert_eq!(packet.data(), b"abc");
    }

    #[test]
    fn with_size_is_zero_filled_and_fillable() {
        let mut packet = Packet::with_size(4, PacketFlags::RELIABLE).unwrap();
        assert_eq!(packet.data(), &[0, 0, 0, 0]);
        packet.data_mut().unwrap().copy_from_slice(b"ping");
        assert_eq!(packet.data(), b"ping");
    }

    #[test]
    fn assign_replaces_contents() {
        let mut packet = Packet::new(b"longer contents", PacketFlags::RELIABLE).unwrap();
        packet.assign(b"short").unwrap();
        assert_eq!(packet.data(), b"short");
        assert_eq!(packet.len(), 5);
    }

    #[test]
    fn append_concatenates() {
        let mut packet = Packet::new(b"hel", PacketFlags::RELIABLE).unwrap();
        packet.append(b"lo").unwrap();
        assert_eq!(packet.data(), b"hello");
    }

    #[test]
    fn set_flags_cannot_add_unmanaged() {
        let mut packet = Packet::new(b"x", PacketFlags::RELIABLE).unwrap();
        assert_eq!(
            packet.set_flags(PacketFlags::UNMANAGED),
            Err(PacketError::FlagImmutable)
        );
        packet.set_flags(PacketFlags::UNSEQUENCED).unwrap();
        assert_eq!(packet.flags(), PacketFlags::UNSEQUENCED);
    }

    #[test]
    fn lock_is_one_way() {
        let mut packet = Packet::new(b"payload", PacketFlags::RELIABLE).unwrap();
        let engine = packet.lock().unwrap();
        assert_eq!(engine.as_ref(), b"payload");
        assert!(packet.is_locked());
        assert_eq!(packet.data(), b"payload");
        assert_eq!(packet.assign(b"x"), Err(PacketError::Locked));
        assert_eq!(packet.append(b"x"), Err(PacketError::Locked));
        assert_eq!(packet.resize(1), Err(PacketError::Locked));
        assert_eq!(packet.set_flags(PacketFlags::RELIABLE), Err(PacketError::Locked));
        assert!(matches!(packet.lock(), Err(PacketError::Locked)));
    }

    #[test]
    fn destroy_hook_runs_when_engine_buffer_drops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut packet = Packet::new(b"tracked", PacketFlags::RELIABLE).unwrap();
        packet
            .on_destroy(move |data, flags| {
                assert_eq!(data, b"tracked");
                assert_eq!(flags, PacketFlags::RELIABLE);
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let engine = packet.lock().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(engine);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The locked handle outlives the engine's buffer and still reads.
        assert_eq!(packet.data(), b"tracked");
        drop(packet);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn received_packets_are_locked() {
        let mut packet = Packet::received(Bytes::from_static(b"incoming"), PacketFlags::UNRELIABLE);
        assert!(packet.is_locked());
        assert_eq!(packet.flags(), PacketFlags::UNRELIABLE);
        assert!(matches!(
            packet.on_destroy(|_, _| {}),
            Err(PacketError::Locked)
        ));
        let copy = packet.duplicate().unwrap();
        assert_eq!(copy.ownership(), Ownership::Owned);
        assert_eq!(copy.data(), b"incoming");
    }

    #[test]
    fn flags_map_onto_engine_kinds() {
        assert_eq!(PacketFlags::RELIABLE.kind(), PacketKind::Reliable);
        assert_eq!(
            PacketFlags::UNRELIABLE.kind(),
            PacketKind::Unreliable { sequenced: true }
        );
        assert_eq!(
            (PacketFlags::UNSEQUENCED | PacketFlags::UNMANAGED).kind(),
            PacketKind::Unreliable { sequenced: false }
        );
        assert_eq!(
            (PacketFlags::FRAGMENT | PacketFlags::UNSEQUENCED).kind(),
            PacketKind::AlwaysUnreliable { sequenced: false }
        );
        for flags in [
            PacketFlags::RELIABLE,
            PacketFlags::UNRELIABLE,
            PacketFlags::UNSEQUENCED,
            PacketFlags::FRAGMENT,
            PacketFlags::FRAGMENT | PacketFlags::UNSEQUENCED,
        ] {
            assert_eq!(PacketFlags::from_kind(flags.kind()), flags);
        }
    }
}
