//! Batched datagram transport over packet slot buffers.
//!
//! A transport moves whole slot buffers in one call: receive fills up to
//! `max` slots and records each datagram's length in its slot header; send
//! transmits the first `count` slots using the length and destination
//! already written there.

mod dump;
mod error;
#[cfg(target_os = "linux")]
mod raw;

pub use dump::DumpTransport;
pub use error::TransportError;
#[cfg(target_os = "linux")]
pub use raw::RawSocket6;

use quarry_wire::PacketSlotBuffer;

pub trait Transport: Send {
    /// Receives up to `max` datagrams into slots `0..n` and returns `n`.
    ///
    /// A receive timeout with nothing queued returns `Ok(0)`.
    fn recv_batch(&mut self, buf: &mut PacketSlotBuffer, max: usize) -> Result<usize, TransportError>;

    /// Sends slots `0..count` and returns how many the kernel accepted.
    fn send_batch(&mut self, buf: &PacketSlotBuffer, count: usize) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn recv_batch(&mut self, buf: &mut PacketSlotBuffer, max: usize) -> Result<usize, TransportError> {
        (**self).recv_batch(buf, max)
    }

    fn send_batch(&mut self, buf: &PacketSlotBuffer, count: usize) -> Result<usize, TransportError> {
        (**self).send_batch(buf, count)
    }
}
