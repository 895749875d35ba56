//! Byte and bit shuffle filters.
//!
//! Both transforms are length-preserving and operate on one block at a
//! time, so `decompress_range` only ever has to unshuffle the blocks it
//! actually decoded.

/// Transpose `buf` (an array of `item_size`-byte items) so that all items'
/// first bytes come first, then all second bytes, and so on.
pub fn byte_shuffle(buf: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 {
        return buf.to_vec();
    }
    let n_items = buf.len() / item_size;
    let full = n_items * item_size;
    let mut out = vec![0u8; buf.len()];
    for item in 0..n_items {
        for b in 0..item_size {
            out[b * n_items + item] = buf[item * item_size + b];
        }
    }
    out[full..].copy_from_slice(&buf[full..]);
    out
}

pub fn byte_unshuffle(buf: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 {
        return buf.to_vec();
    }
    let n_items = buf.len() / item_size;
    let full = n_items * item_size;
    let mut out = vec![0u8; buf.len()];
    for item in 0..n_items {
        for b in 0..item_size {
            out[item * item_size + b] = buf[b * n_items + item];
        }
    }
    out[full..].copy_from_slice(&buf[full..]);
    out
}

/// Bit-wise transpose within groups of 8 items (one bit-plane byte per bit
/// position per group). Items that don't form a complete group of 8 at the
/// tail of the block are passed through unshuffled.
pub fn bit_shuffle(buf: &[u8], item_size: usize) -> Vec<u8> {
    if item_size == 0 {
        return buf.to_vec();
    }
    let n_items = buf.len() / item_size;
    let n_groups = n_items / 8;
    let group_bytes = n_groups * 8 * item_size;
    let mut out = vec![0u8; buf.len()];
    let nbits = item_size * 8;

    for g in 0..n_groups {
        let base = g * 8 * item_size;
        for bit in 0..nbits {
            let byte_idx = bit / 8;
            let bit_in_byte = bit % 8;
            let mut packed = 0u8;
            for lane in 0..8 {
                let src = buf[base + lane * item_size + byte_idx];
                let bitval = (src >> bit_in_byte) & 1;
                packed |= bitval << lane;
            }
            out[base + bit] = packed;
        }
    }
    out[group_bytes..].copy_from_slice(&buf[group_bytes..]);
    out
}

pub fn bit_unshuffle(buf: &[u8], item_size: usize) -> Vec<u8> {
    if item_size == 0 {
        return buf.to_vec();
    }
    let n_items = buf.len() / item_size;
    let n_groups = n_items / 8;
    let group_bytes = n_groups * 8 * item_size;
    let mut out = vec![0u8; buf.len()];
    let nbits = item_size * 8;

    for g in 0..n_groups {
        let base = g * 8 * item_size;
        for bit in 0..nbits {
            let packed = buf[base + bit];
            let byte_idx = bit / 8;
            let bit_in_byte = bit % 8;
            for lane in 0..8 {
                let bitval = (packed >> lane) & 1;
                if bitval == 1 {
                    out[base + lane * item_size + byte_idx] |= 1 << bit_in_byte;
                }
            }
        }
    }
    out[group_bytes..].copy_from_slice(&buf[group_bytes..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_shuffle_roundtrip() {
        let data: Vec<u8> = (0..100u32).flat_map(|v| v.to_le_bytes()).collect();
        let shuffled = byte_shuffle(&data, 4);
        let restored = byte_unshuffle(&shuffled, 4);
        assert_eq!(data, restored);
        assert_ne!(data, shuffled);
    }

    #[test]
    fn byte_shuffle_handles_remainder() {
        let data: Vec<u8> = (0..37u8).collect(); // not a multiple of 4
        let shuffled = byte_shuffle(&data, 4);
        assert_eq!(shuffled.len(), data.len());
        assert_eq!(byte_unshuffle(&shuffled, 4), data);
    }

    #[test]
    fn bit_shuffle_roundtrip() {
        let data: Vec<u8> = (0..256u32).flat_map(|v| v.to_le_bytes()).collect();
        let shuffled = bit_shuffle(&data, 4);
        assert_eq!(shuffled.len(), data.len());
        let restored = bit_unshuffle(&shuffled, 4);
        assert_eq!(data, restored);
    }

    #[test]
    fn bit_shuffle_handles_ungrouped_tail() {
        // 10 items of 2 bytes: one full group of 8, a tail of 2 passed through.
        let data: Vec<u8> = (0..20u8).collect();
        let shuffled = bit_shuffle(&data, 2);
        assert_eq!(&shuffled[16..], &data[16..]);
        assert_eq!(bit_unshuffle(&shuffled, 2), data);
    }
}
