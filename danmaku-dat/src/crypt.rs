//! XOR-stream obfuscation.
//!
//! Two families of ciphers appear across the containers. The additive
//! ladder XORs each byte with a running key (`key += step1; step1 +=
//! step2`) over at most `limit` bytes, in chunks of `block` bytes; the
//! interleaved variant permutes the keystream within each chunk and guards
//! the fixed-size mainline header. The legacy table cipher is a
//! ciphertext-feedback ladder where the key absorbs each plaintext byte.

use danmaku_types::Version;

/// One ladder schedule: initial key, the two key steps, the chunk size and
/// the total number of bytes the schedule covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptParams {
    /// Initial XOR key.
    pub key: u8,
    /// Added to the key after every byte.
    pub step: u8,
    /// Added to the step after every byte.
    pub step2: u8,
    /// Chunk size; only the interleaved variant observes chunk boundaries.
    pub block: usize,
    /// Bytes beyond this stay in the clear.
    pub limit: usize,
}

impl CryptParams {
    /// Shorthand for the zero-`step2` schedules the containers ship with.
    pub const fn new(key: u8, step: u8, block: usize, limit: usize) -> Self {
        Self {
            key,
            step,
            step2: 0,
            block,
            limit,
        }
    }
}

fn apply_ladder(data: &mut [u8], p: CryptParams, interleave: bool) {
    let n = data.len().min(p.limit);
    let block = p.block.max(1);
    let mut key = p.key;
    let mut step = p.step;

    for chunk in data[..n].chunks_mut(block) {
        if interleave {
            // First half of the keystream lands on even positions, second
            // half on odd positions.
            let half = (chunk.len() + 1) / 2;
            let mut mask = vec![0u8; chunk.len()];
            for m in mask.iter_mut() {
                *m = key;
                key = key.wrapping_add(step);
                step = step.wrapping_add(p.step2);
            }
            for (j, m) in mask.iter().enumerate() {
                let pos = if j < half { 2 * j } else { 2 * (j - half) + 1 };
                chunk[pos] ^= m;
            }
        } else {
            for b in chunk.iter_mut() {
                *b ^= key;
                key = key.wrapping_add(step);
                step = step.wrapping_add(p.step2);
            }
        }
    }
}

/// Scramble `data` in place with the plain ladder.
pub fn encrypt(data: &mut [u8], p: CryptParams) {
    apply_ladder(data, p, false);
}

/// Undo [`encrypt`]. The ladder is a pure XOR mask, so this applies the
/// same keystream again.
pub fn decrypt(data: &mut [u8], p: CryptParams) {
    apply_ladder(data, p, false);
}

/// Scramble `data` in place with the interleaved ladder used for the
/// mainline fixed header.
pub(crate) fn encrypt_interleaved(data: &mut [u8], p: CryptParams) {
    apply_ladder(data, p, true);
}

/// Undo [`encrypt_interleaved`].
pub(crate) fn decrypt_interleaved(data: &mut [u8], p: CryptParams) {
    apply_ladder(data, p, true);
}

/// Legacy table cipher: each byte is XORed with the key, which then absorbs
/// the plaintext byte.
pub(crate) fn feedback_encrypt(data: &mut [u8], mut key: u8) {
    for b in data.iter_mut() {
        let plain = *b;
        *b ^= key;
        key = key.wrapping_sub(plain);
    }
}

/// Undo [`feedback_encrypt`].
pub(crate) fn feedback_decrypt(data: &mut [u8], mut key: u8) {
    for b in data.iter_mut() {
        *b ^= key;
        key = key.wrapping_sub(*b);
    }
}

/// Schedule for the mainline fixed-size header.
pub(crate) const HEADER_PARAMS: CryptParams = CryptParams::new(0x1b, 0x37, 16, 16);

/// Schedule for the entry table appended after the bodies.
pub(crate) const TABLE_PARAMS: CryptParams = CryptParams::new(0x3e, 0x9b, 0x80, usize::MAX);

/// Marked-family header fields (everything but the magic).
pub(crate) const MARKED_HEADER_PARAMS: CryptParams = CryptParams::new(0x1b, 0x37, 12, 0x400);

/// Marked-family entry table; only the first kilobyte is scrambled.
pub(crate) const MARKED_TABLE_PARAMS: CryptParams = CryptParams::new(0x3e, 0x9b, 0x80, 0x400);

/// Marked-family body schedule, selected by filename extension. The type
/// character is stored in the `edz` marker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExtParams {
    pub type_char: u8,
    pub ext: &'static str,
    pub params: CryptParams,
}

pub(crate) const TH08_EXT_PARAMS: [ExtParams; 7] = [
    ExtParams { type_char: b'-', ext: "", params: CryptParams::new(0x35, 0x97, 0x80, 0x2800) },
    ExtParams { type_char: b'A', ext: ".anm", params: CryptParams::new(0xc1, 0x51, 0x1400, 0x2000) },
    ExtParams { type_char: b'E', ext: ".ecl", params: CryptParams::new(0xab, 0xcd, 0x200, 0x1000) },
    ExtParams { type_char: b'J', ext: ".jpg", params: CryptParams::new(0x03, 0x19, 0x1400, 0x7800) },
    ExtParams { type_char: b'M', ext: ".msg", params: CryptParams::new(0x1b, 0x37, 0x40, 0x2000) },
    ExtParams { type_char: b'T', ext: ".txt", params: CryptParams::new(0x51, 0xe9, 0x40, 0x3000) },
    ExtParams { type_char: b'W', ext: ".wav", params: CryptParams::new(0x12, 0x34, 0x400, 0x2800) },
];

pub(crate) const TH09_EXT_PARAMS: [ExtParams; 7] = [
    ExtParams { type_char: b'-', ext: "", params: CryptParams::new(0x35, 0x97, 0x80, 0x2800) },
    ExtParams { type_char: b'A', ext: ".anm", params: CryptParams::new(0xc1, 0x51, 0x400, 0x400) },
    ExtParams { type_char: b'E', ext: ".ecl", params: CryptParams::new(0xab, 0xcd, 0x200, 0x1000) },
    ExtParams { type_char: b'J', ext: ".jpg", params: CryptParams::new(0x03, 0x19, 0x400, 0x400) },
    ExtParams { type_char: b'M', ext: ".msg", params: CryptParams::new(0x1b, 0x37, 0x40, 0x2800) },
    ExtParams { type_char: b'T', ext: ".txt", params: CryptParams::new(0x51, 0xe9, 0x40, 0x3000) },
    ExtParams { type_char: b'W', ext: ".wav", params: CryptParams::new(0x12, 0x34, 0x400, 0x400) },
];

const TH95_BODY_PARAMS: [CryptParams; 8] = [
    CryptParams::new(0x1b, 0x37, 0x40, 0x2800),
    CryptParams::new(0x51, 0xe9, 0x40, 0x3000),
    CryptParams::new(0xc1, 0x51, 0x80, 0x3200),
    CryptParams::new(0x03, 0x19, 0x400, 0x7800),
    CryptParams::new(0xab, 0xcd, 0x200, 0x2800),
    CryptParams::new(0x12, 0x34, 0x80, 0x3200),
    CryptParams::new(0x35, 0x97, 0x80, 0x2800),
    CryptParams::new(0x99, 0x37, 0x400, 0x2000),
];

const TH12_BODY_PARAMS: [CryptParams; 8] = [
    CryptParams::new(0x1b, 0x73, 0x40, 0x3800),
    CryptParams::new(0x51, 0x9e, 0x40, 0x4000),
    CryptParams::new(0xc1, 0x15, 0x400, 0x2c00),
    CryptParams::new(0x03, 0x91, 0x80, 0x6400),
    CryptParams::new(0xab, 0xdc, 0x80, 0x6e00),
    CryptParams::new(0x12, 0x43, 0x200, 0x3c00),
    CryptParams::new(0x35, 0x79, 0x400, 0x3c00),
    CryptParams::new(0x99, 0x7d, 0x80, 0x2800),
];

const TH13_BODY_PARAMS: [CryptParams; 8] = [
    CryptParams::new(0x1b, 0x73, 0x100, 0x3800),
    CryptParams::new(0x12, 0x43, 0x200, 0x3e00),
    CryptParams::new(0x35, 0x79, 0x400, 0x3c00),
    CryptParams::new(0x03, 0x91, 0x80, 0x6400),
    CryptParams::new(0xab, 0xdc, 0x80, 0x6e00),
    CryptParams::new(0x51, 0x9e, 0x100, 0x4000),
    CryptParams::new(0xc1, 0x15, 0x400, 0x2c00),
    CryptParams::new(0x99, 0x7d, 0x80, 0x4400),
];

const TH14_BODY_PARAMS: [CryptParams; 8] = [
    CryptParams::new(0x1b, 0x73, 0x100, 0x3800),
    CryptParams::new(0x12, 0x43, 0x200, 0x3e00),
    CryptParams::new(0x35, 0x79, 0x400, 0x3c00),
    CryptParams::new(0x03, 0x91, 0x80, 0x6400),
    CryptParams::new(0xab, 0xdc, 0x80, 0x7000),
    CryptParams::new(0x51, 0x9e, 0x100, 0x4000),
    CryptParams::new(0xc1, 0x15, 0x400, 0x2c00),
    CryptParams::new(0x99, 0x7d, 0x80, 0x4400),
];

/// Hash a filename into one of the eight mainline body schedules.
fn body_param_index(name: &str) -> usize {
    let sum = name.bytes().fold(0u8, u8::wrapping_add);
    usize::from(sum & 7)
}

/// Body schedule for a mainline entry, selected by version and filename.
pub(crate) fn mainline_body_params(version: Version, name: &str) -> CryptParams {
    let table = match version {
        Version::Th095 | Version::Th10 | Version::Th103 | Version::Th11 => &TH95_BODY_PARAMS,
        Version::Th12 | Version::Th125 | Version::Th128 => &TH12_BODY_PARAMS,
        Version::Th13 => &TH13_BODY_PARAMS,
        _ => &TH14_BODY_PARAMS,
    };
    table[body_param_index(name)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ladder_matches_known_keystream() {
        let mut data = [0u8; 4];
        encrypt(&mut data, CryptParams::new(0x35, 0x97, 0x80, 0x80));
        assert_eq!(data, [0x35, 0xcc, 0x63, 0xfa]);
    }

    #[test]
    fn ladder_is_involutive_with_zero_step2() {
        let mut data = *b"MARISA.DAT body bytes";
        let orig = data;
        let p = CryptParams::new(0x1b, 0x37, 0x40, 0x2800);
        encrypt(&mut data, p);
        assert_ne!(data, orig);
        encrypt(&mut data, p);
        assert_eq!(data, orig);
    }

    #[test]
    fn limit_leaves_the_tail_clear() {
        let mut data = [0u8; 8];
        encrypt(&mut data, CryptParams::new(0xff, 0, 4, 4));
        assert_eq!(&data[..4], [0xff; 4]);
        assert_eq!(&data[4..], [0u8; 4]);
    }

    #[test]
    fn feedback_cipher_round_trips() {
        let mut data = *b"\x00\x01\x02entry table bytes\xff";
        let orig = data;
        feedback_encrypt(&mut data, 0x12);
        assert_ne!(data, orig);
        feedback_decrypt(&mut data, 0x12);
        assert_eq!(data, orig);
    }

    proptest! {
        #[test]
        fn every_schedule_round_trips(
            data in proptest::collection::vec(any::<u8>(), 0..0x1000),
            key: u8,
            step: u8,
            step2: u8,
            block in 1usize..0x800,
            limit in 0usize..0x1000,
        ) {
            let p = CryptParams { key, step, step2, block, limit };
            let mut buf = data.clone();
            encrypt(&mut buf, p);
            decrypt(&mut buf, p);
            prop_assert_eq!(&buf, &data);

            encrypt_interleaved(&mut buf, p);
            decrypt_interleaved(&mut buf, p);
            prop_assert_eq!(&buf, &data);

            feedback_encrypt(&mut buf, key);
            feedback_decrypt(&mut buf, key);
            prop_assert_eq!(&buf, &data);
        }
    }
}
