//! xxHash32, used to pick the home slot of a table key.
//!
//! Keys are hashed by content rather than by interned id, so a table laid out
//! before a save finds its keys in the same slots after load remaps every id.

const PRIME1: u32 = 0x9E37_79B1;
const PRIME2: u32 = 0x85EB_CA77;
const PRIME3: u32 = 0xC2B2_AE3D;
const PRIME4: u32 = 0x27D4_EB2F;
const PRIME5: u32 = 0x1656_67B1;

#[inline]
fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
fn round(acc: u32, lane: u32) -> u32 {
    acc.wrapping_add(lane.wrapping_mul(PRIME2))
        .rotate_left(13)
        .wrapping_mul(PRIME1)
}

/// Compute xxHash32 of `data` with `seed`.
#[must_use]
pub fn xxh32(data: &[u8], seed: u32) -> u32 {
    let stripes = data.chunks_exact(16);
    let tail = stripes.remainder();

    let mut h32 = if data.len() >= 16 {
        let mut lanes = [
            seed.wrapping_add(PRIME1).wrapping_add(PRIME2),
            seed.wrapping_add(PRIME2),
            seed,
            seed.wrapping_sub(PRIME1),
        ];
        for stripe in stripes {
            for (lane, word) in lanes.iter_mut().zip(stripe.chunks_exact(4)) {
                *lane = round(*lane, read_u32(word));
            }
        }
        lanes[0]
            .rotate_left(1)
            .wrapping_add(lanes[1].rotate_left(7))
            .wrapping_add(lanes[2].rotate_left(12))
            .wrapping_add(lanes[3].rotate_left(18))
    } else {
        seed.wrapping_add(PRIME5)
    };

    h32 = h32.wrapping_add(data.len() as u32);

    let words = tail.chunks_exact(4);
    let bytes = words.remainder();
    for word in words {
        h32 = h32
            .wrapping_add(read_u32(word).wrapping_mul(PRIME3))
            .rotate_left(17)
            .wrapping_mul(PRIME4);
    }
    for &byte in bytes {
        h32 = h32
            .wrapping_add(u32::from(byte).wrapping_mul(PRIME5))
            .rotate_left(11)
            .wrapping_mul(PRIME1);
    }

    // avalanche
    h32 ^= h32 >> 15;
    h32 = h32.wrapping_mul(PRIME2);
    h32 ^= h32 >> 13;
    h32 = h32.wrapping_mul(PRIME3);
    h32 ^= h32 >> 16;
    h32
}

/// Hash used for table key placement.
#[inline]
#[must_use]
pub(crate) fn key_hash(key: &str) -> u32 {
    xxh32(key.as_bytes(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let cases: &[(&[u8], u32, u32)] = &[
            (b"", 0, 0x02CC_5D05),
            (b"a", 0, 0x550D_7456),
            (b"abc", 0, 0x32D1_53FF),
            (b"Nobody inspects the spammish repetition", 0, 0xE229_3B2F),
            (b"0123456789abcdef0123456789abcdef!", 0, 0x0C66_A739),
            (b"", PRIME1, 0x36B7_8AE7),
            (b"abc", PRIME1, 0xA1AE_7709),
            (b"0123456789abcdef0123456789abcdef!", PRIME1, 0xA1DA_DA25),
        ];
        for &(data, seed, expected) in cases {
            assert_eq!(
                xxh32(data, seed),
                expected,
                "failed for {:?} seed={seed:#X}",
                String::from_utf8_lossy(data)
            );
        }
    }

    #[test]
    fn test_key_hash_is_content_based() {
        let owned = String::from("position");
        assert_eq!(key_hash(&owned), key_hash("position"));
        assert_ne!(key_hash("position"), key_hash("Position"));
    }
}
