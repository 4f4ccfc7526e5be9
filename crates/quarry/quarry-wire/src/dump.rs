use crate::layout::{EXT_HEADER_LEN, EXT_HEADER_OFFSET, LENGTH_OFFSET, PAYLOAD_OFFSET};
use std::fmt;

/// Colon-separated hex rendering of one slot, split into its header sections:
///
/// `family+port+flow addr scope len | ext-head uni type+trailer | payload`
///
/// The payload section is printed only when the declared length covers it.
pub struct SlotDump<'a> {
    slot: &'a [u8],
}

impl<'a> SlotDump<'a> {
    pub(crate) fn new(slot: &'a [u8]) -> Self {
        Self { slot }
    }

    fn declared_length(&self) -> i32 {
        let mut len = [0u8; 4];
        len.copy_from_slice(&self.slot[LENGTH_OFFSET..LENGTH_OFFSET + 4]);
        i32::from_ne_bytes(len)
    }
}

fn hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            f.write_str(":")?;
        }
        write!(f, "{b:02X}")?;
    }
    Ok(())
}

impl fmt::Display for SlotDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.slot;
        hex(f, &s[0..8])?;
        f.write_str(" ")?;
        hex(f, &s[8..24])?;
        f.write_str(" ")?;
        hex(f, &s[24..28])?;
        f.write_str(" ")?;
        hex(f, &s[28..32])?;
        f.write_str(" | ")?;

        let ext = &s[EXT_HEADER_OFFSET..EXT_HEADER_OFFSET + EXT_HEADER_LEN];
        hex(f, &ext[0..4])?;
        f.write_str(" ")?;
        hex(f, &ext[4..20])?;
        f.write_str(" ")?;
        hex(f, &ext[20..24])?;

        let payload = self.declared_length().saturating_sub(EXT_HEADER_LEN as i32);
        if payload > 0 {
            let end = (PAYLOAD_OFFSET + payload as usize).min(s.len());
            f.write_str(" | ")?;
            hex(f, &s[PAYLOAD_OFFSET..end])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{PacketSlotBuffer, PacketType};

    #[test]
    fn minimal_packet_has_no_payload_section() {
        let mut buf = PacketSlotBuffer::allocate(1, 256);
        buf.write_ext_header_template(0);
        buf.write_type(0, PacketType::Minimal);
        buf.write_length(0, PacketType::Minimal.length() as i32);
        let out = buf.dump(0).to_string();
        assert_eq!(out.matches(" | ").count(), 1);
        assert!(out.contains("FF:20:00:00 FC:00"));
        assert!(out.ends_with("01:88:12:34"));
    }

    #[test]
    fn attribute_packet_dumps_its_payload() {
        let mut buf = PacketSlotBuffer::allocate(1, 256);
        buf.write_ext_header_template(0);
        buf.write_payload_template(0, 256);
        buf.write_type(0, PacketType::Attribute);
        buf.write_length(0, PacketType::Attribute.length() as i32);
        let out = buf.dump(0).to_string();
        let payload = out.rsplit(" | ").next().unwrap();
        assert_eq!(payload.split(':').count(), 16);
        assert!(payload.starts_with("64:61:74:61:3A"));
    }

    #[test]
    fn negative_declared_length_prints_headers_only() {
        let mut buf = PacketSlotBuffer::allocate(1, 256);
        buf.write_ext_header_template(0);
        buf.write_payload_template(0, 256);
        for len in [i32::MIN, i32::MIN + 3, -1] {
            buf.write_length(0, len);
            let out = buf.dump(0).to_string();
            assert_eq!(out.matches(" | ").count(), 1, "length {len}");
        }
    }
}
