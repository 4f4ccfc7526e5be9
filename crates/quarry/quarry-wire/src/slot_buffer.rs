//! Multi-slot packet buffer and its fixed-offset codec.
//!
//! Every operation is O(1) pointer arithmetic on `slot * slot_size + offset`.
//! Slot indices are trusted: an out-of-range slot panics on the slice index,
//! it never reads another buffer's memory.

use crate::dump::SlotDump;
use crate::layout::*;
use crate::packet_type::PacketType;
use crate::uni::{Uni, UniShape};
use rand::Rng;
use std::net::Ipv6Addr;

/// One contiguous region of `slots * slot_size` bytes plus a fill count.
///
/// A buffer is owned by exactly one thread at a time; it moves between
/// threads by value through the exchange lanes.
pub struct PacketSlotBuffer {
    slots: usize,
    slot_size: usize,
    packets: usize,
    bytes: Box<[u8]>,
}

impl PacketSlotBuffer {
    /// Zero-filled buffer of `slots` slots, each `slot_size` bytes.
    pub fn allocate(slots: usize, slot_size: usize) -> Self {
        assert!(slots > 0, "buffer needs at least one slot");
        assert!(
            slot_size >= PAYLOAD_OFFSET,
            "slot size {slot_size} cannot hold the extension header"
        );
        Self {
            slots,
            slot_size,
            packets: 0,
            bytes: vec![0u8; slots * slot_size].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn slots(&self) -> usize {
        self.slots
    }

    #[inline(always)]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of populated slots, always in `0..=slots`.
    #[inline(always)]
    pub fn packets(&self) -> usize {
        self.packets
    }

    #[inline(always)]
    pub fn set_packets(&mut self, packets: usize) {
        debug_assert!(packets <= self.slots);
        self.packets = packets.min(self.slots);
    }

    #[inline(always)]
    fn base(&self, slot: usize) -> usize {
        slot * self.slot_size
    }

    pub fn slot(&self, slot: usize) -> &[u8] {
        let base = self.base(slot);
        &self.bytes[base..base + self.slot_size]
    }

    pub fn slot_mut(&mut self, slot: usize) -> &mut [u8] {
        let base = self.base(slot);
        &mut self.bytes[base..base + self.slot_size]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Base pointer for batched transport calls.
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    pub fn write_destination(&mut self, slot: usize, addr: &Ipv6Addr) {
        let at = self.base(slot) + ADDR_OFFSET;
        self.bytes[at..at + 16].copy_from_slice(&addr.octets());
    }

    pub fn read_address(&self, slot: usize) -> Ipv6Addr {
        let at = self.base(slot) + ADDR_OFFSET;
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes[at..at + 16]);
        Ipv6Addr::from(octets)
    }

    /// Fixed protocol bytes with a zeroed UNI and type code.
    pub fn write_ext_header_template(&mut self, slot: usize) {
        let at = self.base(slot) + EXT_HEADER_OFFSET;
        self.bytes[at..at + EXT_HEADER_LEN].copy_from_slice(&EXT_HEADER_TEMPLATE);
    }

    /// Fills `length` payload bytes with the repeating marker, clipped to the slot.
    pub fn write_payload_template(&mut self, slot: usize, length: usize) {
        let length = length.min(self.slot_size - PAYLOAD_OFFSET);
        let at = self.base(slot) + PAYLOAD_OFFSET;
        for (dst, src) in self.bytes[at..at + length]
            .iter_mut()
            .zip(PAYLOAD_MARKER.iter().cycle())
        {
            *dst = *src;
        }
    }

    /// Stamps a generated packet: length, sampled UNI coordinate and type code.
    ///
    /// A malformed packet is corrupted one of two ways with equal odds: the
    /// true type with its length plus one, or the `Error` code at `Minimal`
    /// length. Either way it still carries a sampled UNI.
    pub fn write_packet_data<R: Rng + ?Sized>(
        &mut self,
        slot: usize,
        ty: PacketType,
        shape: &UniShape,
        well_formed: bool,
        rng: &mut R,
    ) {
        let (mut code, mut length) = (ty.code(), ty.length() as i32);
        if !well_formed {
            if rng.gen_range(0..2) == 0 {
                length += 1;
            } else {
                code = PacketType::Error.code();
                length = PacketType::Minimal.length() as i32;
            }
        }
        self.write_length(slot, length);

        let volume = if shape.volumes == 1 {
            0
        } else {
            rng.gen_range(0..shape.volumes) as u8
        };
        let segment = if shape.segments == 1 {
            0
        } else {
            rng.gen_range(0..shape.segments) as u8
        };
        let address = rng.gen_range(1..=shape.addresses) as u16;

        let uni = self.base(slot) + EXT_HEADER_OFFSET + EXT_UNI_OFFSET;
        self.bytes[uni + Uni::VOLUME_BYTE] = volume;
        self.bytes[uni + Uni::SEGMENT_BYTE] = segment;
        self.bytes[uni + Uni::ADDRESS_BYTE..uni + Uni::ADDRESS_BYTE + 2]
            .copy_from_slice(&address.to_be_bytes());
        self.write_type_code(slot, code);
    }

    #[inline(always)]
    pub fn read_type_code(&self, slot: usize) -> u8 {
        self.bytes[self.base(slot) + EXT_HEADER_OFFSET + EXT_TYPE_OFFSET]
    }

    #[inline(always)]
    pub fn read_type(&self, slot: usize) -> PacketType {
        PacketType::from_code(self.read_type_code(slot))
    }

    #[inline(always)]
    pub fn write_type_code(&mut self, slot: usize, code: u8) {
        let at = self.base(slot) + EXT_HEADER_OFFSET + EXT_TYPE_OFFSET;
        self.bytes[at] = code;
    }

    #[inline(always)]
    pub fn write_type(&mut self, slot: usize, ty: PacketType) {
        self.write_type_code(slot, ty.code());
    }

    pub fn read_uni(&self, slot: usize) -> Uni {
        let at = self.base(slot) + EXT_HEADER_OFFSET + EXT_UNI_OFFSET;
        let mut uni = [0u8; 16];
        uni.copy_from_slice(&self.bytes[at..at + 16]);
        Uni(uni)
    }

    #[inline(always)]
    pub fn read_length(&self, slot: usize) -> i32 {
        let at = self.base(slot) + LENGTH_OFFSET;
        i32::from_ne_bytes([
            self.bytes[at],
            self.bytes[at + 1],
            self.bytes[at + 2],
            self.bytes[at + 3],
        ])
    }

    #[inline(always)]
    pub fn write_length(&mut self, slot: usize, length: i32) {
        let at = self.base(slot) + LENGTH_OFFSET;
        self.bytes[at..at + 4].copy_from_slice(&length.to_ne_bytes());
    }

    /// Sole acceptance gate: a known type whose declared length is canonical.
    #[inline]
    pub fn validate(&self, slot: usize) -> bool {
        match self.read_type(slot) {
            PacketType::Error => false,
            ty => self.read_length(slot) == ty.length() as i32,
        }
    }

    /// Sectioned hex rendering of one slot. Diagnostics only.
    pub fn dump(&self, slot: usize) -> SlotDump<'_> {
        SlotDump::new(self.slot(slot))
    }
}

impl std::fmt::Debug for PacketSlotBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSlotBuffer")
            .field("slots", &self.slots)
            .field("slot_size", &self.slot_size)
            .field("packets", &self.packets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn templated(slots: usize) -> PacketSlotBuffer {
        let mut buf = PacketSlotBuffer::allocate(slots, 1024);
        for slot in 0..slots {
            buf.write_destination(slot, &Ipv6Addr::LOCALHOST);
            buf.write_ext_header_template(slot);
            buf.write_payload_template(slot, 1024);
        }
        buf
    }

    #[test]
    fn allocation_is_zeroed_and_sized() {
        let buf = PacketSlotBuffer::allocate(16, 256);
        assert_eq!(buf.as_bytes().len(), 16 * 256);
        assert!(buf.as_bytes().iter().all(|b| *b == 0));
        assert_eq!(buf.packets(), 0);
    }

    /// Well-formed packets always pass validation and decode inside the shape,
    /// across every real type and a spread of address-space shapes.
    #[test]
    fn well_formed_packets_validate_and_stay_in_shape() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut buf = templated(64);
        let shapes = [
            UniShape::new(1, 1, 1),
            UniShape::new(1, 1, 65_535),
            UniShape::new(3, 17, 100),
            UniShape::new(256, 256, 65_535),
        ];
        for shape in shapes {
            for ty in &PacketType::ALL[..3] {
                for slot in 0..buf.slots() {
                    buf.write_packet_data(slot, *ty, &shape, true, &mut rng);
                    assert!(buf.validate(slot));
                    assert_eq!(buf.read_type(slot), *ty);
                    let uni = buf.read_uni(slot);
                    assert!(shape.contains(&uni), "{uni} outside {shape:?}");
                    assert_eq!(uni.0[0], UNI_PREFIX);
                }
            }
        }
    }

    #[test]
    fn malformed_packets_never_validate() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut buf = templated(128);
        let shape = UniShape::new(4, 4, 1000);
        let mut error_coded = 0;
        for ty in &PacketType::ALL[..3] {
            for slot in 0..buf.slots() {
                buf.write_packet_data(slot, *ty, &shape, false, &mut rng);
                assert!(!buf.validate(slot));
                if buf.read_type(slot) == PacketType::Error {
                    assert_eq!(buf.read_length(slot), PacketType::Minimal.length() as i32);
                    error_coded += 1;
                } else {
                    assert_eq!(buf.read_length(slot), ty.length() as i32 + 1);
                }
            }
        }
        // both corruption modes show up
        assert!(error_coded > 0 && error_coded < 3 * 128);
    }

    #[test]
    fn type_write_read_round_trip() {
        let mut buf = templated(1);
        for ty in PacketType::ALL {
            buf.write_type(0, ty);
            assert_eq!(buf.read_type_code(0), ty.code());
        }
        buf.write_type_code(0, 0x42);
        assert_eq!(buf.read_type(0), PacketType::Error);
    }

    #[test]
    fn templates_land_at_fixed_offsets() {
        let buf = templated(2);
        let slot = buf.slot(1);
        assert_eq!(&slot[ADDR_OFFSET..ADDR_OFFSET + 16], &Ipv6Addr::LOCALHOST.octets());
        assert_eq!(
            &slot[EXT_HEADER_OFFSET..EXT_HEADER_OFFSET + EXT_HEADER_LEN],
            &EXT_HEADER_TEMPLATE
        );
        assert_eq!(&slot[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 10], b"data:data:");
        assert_eq!(slot[1023], b"data:"[(1024 - PAYLOAD_OFFSET - 1) % 5]);
    }

    #[test]
    fn length_mismatch_fails_validation() {
        let mut buf = templated(1);
        buf.write_type(0, PacketType::Attribute);
        buf.write_length(0, PacketType::Attribute.length() as i32);
        assert!(buf.validate(0));
        buf.write_length(0, PacketType::Minimal.length() as i32);
        assert!(!buf.validate(0));
    }
}
