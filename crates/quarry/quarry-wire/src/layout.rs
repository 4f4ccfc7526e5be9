//! Fixed byte offsets inside one packet slot.
//!
//! ```text
//! 0        8                 24    28    32             72          104
//! | sa hdr | ipv6 address    | sid | len | ipv6 header  | ext header | payload ...
//! ```
//!
//! The first 28 bytes follow `sockaddr_in6`, so a slot base can be handed to
//! the kernel directly as a message name. The length field holds the number
//! of bytes after the IPv6 header (extension header plus payload).

/// Bytes of per-slot transport header (address + length).
pub const SLOT_HEADER_LEN: usize = 32;
/// Offset of the 16-byte peer address inside the slot header.
pub const ADDR_OFFSET: usize = 8;
/// Offset of the native-endian i32 payload-length field.
pub const LENGTH_OFFSET: usize = 28;

/// Reserved room for a fixed IPv6 header.
pub const IPV6_HEADER_LEN: usize = 40;
/// Offset of the datagram body handed to / filled by the transport.
pub const DATA_OFFSET: usize = SLOT_HEADER_LEN + IPV6_HEADER_LEN;

pub const EXT_HEADER_LEN: usize = 32;
pub const EXT_HEADER_OFFSET: usize = DATA_OFFSET;
/// Offset of the UNI inside the extension header.
pub const EXT_UNI_OFFSET: usize = 4;
/// Offset of the packet-type code inside the extension header.
pub const EXT_TYPE_OFFSET: usize = 20;

pub const PAYLOAD_OFFSET: usize = EXT_HEADER_OFFSET + EXT_HEADER_LEN;

/// Repeating payload marker.
pub const PAYLOAD_MARKER: &[u8] = b"data:";

/// IP protocol number carried by raw sockets (RFC 3692 experimental).
pub const PROTOCOL: i32 = 253;

/// Fixed prefix byte of every UNI.
pub const UNI_PREFIX: u8 = 0xFC;

/// Extension header template with a zeroed UNI and type code.
pub const EXT_HEADER_TEMPLATE: [u8; EXT_HEADER_LEN] = [
    0xFF, 0x20, 0x00, 0x00, // next header, header length, reserved
    UNI_PREFIX, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // UNI
    0x00, 0x88, 0x12, 0x34, // type code, type attr, local component id
    0, 0, 0, 0, 0, 0, 0, 0, // reserved
];

/// Smallest slot that holds a full payload region for the largest packet type.
pub const MIN_SLOT_SIZE: usize = PAYLOAD_OFFSET + 96;
