//! Pluggable datagram compression.

use std::cell::RefCell;
use std::rc::Rc;

/// Transform applied by the engine to each outgoing datagram body and undone
/// on the receiving side.
///
/// Both directions write into a caller-provided buffer of bounded capacity and
/// return the number of bytes written. `0` means "did not fit" or "failed";
/// a compressor never panics across this boundary. When compression fails, or
/// does not make the datagram smaller, it is sent uncompressed.
pub trait Compressor {
    /// Compress the concatenation of `input` (`input_len` bytes in total).
    fn compress(&mut self, input: &[&[u8]], input_len: usize, output: &mut [u8]) -> usize;

    /// Decompress `input` into `output`.
    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> usize;
}

impl<C: Compressor + ?Sized> Compressor for Box<C> {
    fn compress(&mut self, input: &[&[u8]], input_len: usize, output: &mut [u8]) -> usize {
        (**self).compress(input, input_len, output)
    }

    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> usize {
        (**self).decompress(input, output)
    }
}

/// Compressor slot shared between a host and its engine. The engine only
/// takes a compressor at construction; swapping what sits in the slot changes
/// compression for the rest of the session. An empty slot reports failure,
/// so datagrams go out uncompressed.
#[derive(Clone, Default)]
pub(crate) struct SharedCompressor(Rc<RefCell<Option<Box<dyn Compressor>>>>);

impl SharedCompressor {
    pub fn replace(&self, compressor: Option<Box<dyn Compressor>>) {
        *self.0.borrow_mut() = compressor;
    }

    pub fn is_installed(&self) -> bool {
        self.0.borrow().is_some()
    }
}

impl rusty_enet::Compressor for SharedCompressor {
    fn compress(&mut self, in_buffers: &[&[u8]], in_limit: usize, out: &mut [u8]) -> usize {
        match self.0.borrow_mut().as_mut() {
            Some(compressor) => compressor.compress(in_buffers, in_limit, out),
            None => 0,
        }
    }

    fn decompress(&mut self, in_data: &[u8], out: &mut [u8]) -> usize {
        match self.0.borrow_mut().as_mut() {
            Some(compressor) => compressor.decompress(in_data, out),
            None => 0,
        }
    }
}
