use crate::layout::UNI_PREFIX;
use std::net::Ipv6Addr;

/// Unique Node Identifier: an IPv6-shaped `FC00::VVSS:AAAA` coordinate.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Uni(pub [u8; 16]);

impl Uni {
    pub const VOLUME_BYTE: usize = 12;
    pub const SEGMENT_BYTE: usize = 13;
    pub const ADDRESS_BYTE: usize = 14;

    pub fn new(volume: u8, segment: u8, address: u16) -> Self {
        let mut b = [0u8; 16];
        b[0] = UNI_PREFIX;
        b[Self::VOLUME_BYTE] = volume;
        b[Self::SEGMENT_BYTE] = segment;
        b[Self::ADDRESS_BYTE..].copy_from_slice(&address.to_be_bytes());
        Uni(b)
    }

    #[inline]
    pub fn volume(&self) -> u8 {
        self.0[Self::VOLUME_BYTE]
    }

    #[inline]
    pub fn segment(&self) -> u8 {
        self.0[Self::SEGMENT_BYTE]
    }

    #[inline]
    pub fn address(&self) -> u16 {
        u16::from_be_bytes([self.0[Self::ADDRESS_BYTE], self.0[Self::ADDRESS_BYTE + 1]])
    }

    pub fn as_ipv6(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.0)
    }
}

impl std::fmt::Display for Uni {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ipv6())
    }
}

/// Size of the UNI address space: volumes × segments × addresses.
///
/// Volumes and segments index from zero; addresses from one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniShape {
    pub volumes: u32,
    pub segments: u32,
    pub addresses: u32,
}

impl UniShape {
    pub const MAX_VOLUMES: u32 = 256;
    pub const MAX_SEGMENTS: u32 = 256;
    pub const MAX_ADDRESSES: u32 = 65_535;

    pub const fn new(volumes: u32, segments: u32, addresses: u32) -> Self {
        Self {
            volumes,
            segments,
            addresses,
        }
    }

    pub fn is_valid(&self) -> bool {
        (1..=Self::MAX_VOLUMES).contains(&self.volumes)
            && (1..=Self::MAX_SEGMENTS).contains(&self.segments)
            && (1..=Self::MAX_ADDRESSES).contains(&self.addresses)
    }

    pub fn contains(&self, uni: &Uni) -> bool {
        (uni.volume() as u32) < self.volumes
            && (uni.segment() as u32) < self.segments
            && (1..=self.addresses).contains(&(uni.address() as u32))
    }

    /// Number of distinct nodes in the address space.
    pub fn nodes(&self) -> u64 {
        self.volumes as u64 * self.segments as u64 * self.addresses as u64
    }

    /// Dense index of `uni` in `[0, nodes())`, or `None` when outside the shape.
    pub fn node_index(&self, uni: &Uni) -> Option<u64> {
        if !self.contains(uni) {
            return None;
        }
        let v = uni.volume() as u64;
        let s = uni.segment() as u64;
        let a = uni.address() as u64;
        Some((v * self.segments as u64 + s) * self.addresses as u64 + (a - 1))
    }
}

impl Default for UniShape {
    fn default() -> Self {
        Self::new(1, 1, Self::MAX_ADDRESSES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_as_ipv6() {
        let uni = Uni::new(0x01, 0x02, 0x0304);
        assert_eq!(uni.to_string(), "fc00::102:304");
        assert_eq!((uni.volume(), uni.segment(), uni.address()), (1, 2, 0x0304));
    }

    #[test]
    fn node_index_is_dense() {
        let shape = UniShape::new(2, 3, 4);
        assert_eq!(shape.node_index(&Uni::new(0, 0, 1)), Some(0));
        assert_eq!(shape.node_index(&Uni::new(0, 1, 1)), Some(4));
        assert_eq!(shape.node_index(&Uni::new(1, 2, 4)), Some(shape.nodes() - 1));
        assert_eq!(shape.node_index(&Uni::new(2, 0, 1)), None);
        assert_eq!(shape.node_index(&Uni::new(0, 0, 0)), None);
    }
}
