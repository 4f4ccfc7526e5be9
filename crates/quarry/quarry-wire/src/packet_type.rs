/// Wire packet type. The discriminant is the on-wire code.
///
/// `Error` is a sentinel: it is what an unknown code decodes to, and what a
/// deliberately malformed generated packet is stamped with. It sorts last.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketType {
    Minimal = 0x01,
    Attribute = 0x02,
    AttributeGroup = 0x03,
    Error = 0x04,
}

impl PacketType {
    /// Every type in distribution order; `Error` is last.
    pub const ALL: [PacketType; 4] = [
        PacketType::Minimal,
        PacketType::Attribute,
        PacketType::AttributeGroup,
        PacketType::Error,
    ];

    #[inline(always)]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Canonical length in bytes after the IPv6 header (extension header plus payload).
    #[inline(always)]
    pub const fn length(self) -> usize {
        match self {
            PacketType::Minimal => 32,
            PacketType::Attribute => 48,
            PacketType::AttributeGroup => 96,
            PacketType::Error => 0,
        }
    }

    #[inline(always)]
    pub const fn from_code(code: u8) -> PacketType {
        match code {
            0x01 => PacketType::Minimal,
            0x02 => PacketType::Attribute,
            0x03 => PacketType::AttributeGroup,
            _ => PacketType::Error,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PacketType::Minimal => "MINIMAL",
            PacketType::Attribute => "ATTRIBUTE",
            PacketType::AttributeGroup => "ATTRIBUTE_GROUP",
            PacketType::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(0x{:02X}, {}B)", self.name(), self.code(), self.length())
    }
}
