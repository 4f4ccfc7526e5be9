use crate::{Transport, TransportError};
use quarry_wire::PacketSlotBuffer;
use std::time::Duration;
use tracing::info;

/// Logs every outgoing slot instead of sending it.
///
/// Each batch is reported as fully sent after `pause`, which keeps the
/// output readable when a generator runs unbounded.
#[derive(Debug, Clone)]
pub struct DumpTransport {
    pause: Duration,
}

impl DumpTransport {
    pub const DEFAULT_PAUSE: Duration = Duration::from_millis(500);

    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

impl Default for DumpTransport {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PAUSE)
    }
}

impl Transport for DumpTransport {
    fn recv_batch(&mut self, _buf: &mut PacketSlotBuffer, _max: usize) -> Result<usize, TransportError> {
        std::thread::sleep(self.pause);
        Ok(0)
    }

    fn send_batch(&mut self, buf: &PacketSlotBuffer, count: usize) -> Result<usize, TransportError> {
        for slot in 0..count {
            info!(slot, "{}", buf.dump(slot));
        }
        std::thread::sleep(self.pause);
        Ok(count)
    }
}
