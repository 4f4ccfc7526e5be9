pub mod dump;
pub mod layout;
pub mod packet_type;
pub mod slot_buffer;
pub mod uni;

pub use dump::SlotDump;
pub use packet_type::PacketType;
pub use slot_buffer::PacketSlotBuffer;
pub use uni::{Uni, UniShape};
