//! Hash Slot Mapping
//!
//! CRC16/XMODEM over the key (or its `{hash tag}`) modulo 16384, the routing
//! function used by Redis Cluster.

/// Number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

/// Returns the hash slot owning `key`.
pub fn key_slot(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT
}

/// Part of the key that is hashed.
///
/// The substring between the first `{` and the next `}` when it is non-empty,
/// the whole key otherwise.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
