//! The dictionary codec shared by all compressed container families.
//!
//! LZSS with a single flag bit per token: `1` is followed by an 8-bit
//! literal, `0` by a 13-bit dictionary offset and a 4-bit (length - 3).
//! The dictionary is 8192 bytes, zero-initialised, with the write head
//! starting at index 1; offset 0 never names data and doubles as the
//! stream terminator. Matches may run ahead of the write head, which
//! encodes repeating data. The minimum match is 3 bytes, the maximum 18.

use danmaku_types::{BitReader, BitWriter};

use crate::DatError;

const DICT_SIZE: usize = 0x2000;
const DICT_MASK: usize = 0x1fff;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 18;

const HASH_SIZE: usize = 0x10000;
const HASH_NULL: u32 = 0;

/// Hash over 3-byte dictionary prefixes, with intrusive doubly-linked
/// chains keyed by dictionary position. An entry is unlinked before its
/// slot is overwritten, so chains only ever name live positions.
struct MatchHash {
    hash: Vec<u32>,
    prev: Vec<u32>,
    next: Vec<u32>,
}

impl MatchHash {
    fn new() -> Self {
        Self {
            hash: vec![HASH_NULL; HASH_SIZE],
            prev: vec![HASH_NULL; DICT_SIZE],
            next: vec![HASH_NULL; DICT_SIZE],
        }
    }

    /// Unlink `offset`. Only ever called on the tail of its chain.
    fn remove(&mut self, key: usize, offset: u32) {
        let prev = self.prev[offset as usize];
        self.next[prev as usize] = HASH_NULL;
        if prev == HASH_NULL && self.hash[key] == offset {
            self.hash[key] = HASH_NULL;
        }
    }

    fn add(&mut self, key: usize, offset: u32) {
        let head = self.hash[key];
        self.next[offset as usize] = head;
        self.prev[offset as usize] = HASH_NULL;
        self.prev[head as usize] = offset;
        self.hash[key] = offset;
    }
}

fn generate_key(dict: &[u8; DICT_SIZE], base: usize) -> usize {
    ((usize::from(dict[(base + 1) & DICT_MASK]) << 8)
        | usize::from(dict[(base + 2) & DICT_MASK]))
        ^ (usize::from(dict[base]) << 4)
}

/// Compress `input`.
///
/// Output is deterministic for a given input and never exceeds
/// `input.len() * 9 / 8` plus a small constant for the terminator.
pub fn compress(input: &[u8]) -> Result<Vec<u8>, DatError> {
    let mut bs = BitWriter::new(Vec::with_capacity(input.len() / 2 + 8));
    let mut hash = MatchHash::new();
    let mut dict = [0u8; DICT_SIZE];
    let mut dict_head: usize = 1;
    let mut waiting: usize = 0;
    let mut pos: usize = 0;

    // Fill the forward-looking buffer.
    while waiting < MAX_MATCH && pos < input.len() {
        dict[dict_head + waiting] = input[pos];
        pos += 1;
        waiting += 1;
    }

    let mut dict_head_key = generate_key(&dict, dict_head);

    while waiting > 0 {
        let mut match_len = MIN_MATCH - 1;
        let mut match_offset: u32 = 0;

        // Longest match wins; on a tie the most recent insertion (earlier
        // in the chain) is kept.
        let mut offset = hash.hash[dict_head_key];
        while offset != HASH_NULL && waiting > match_len {
            let off = offset as usize;
            // Check a character further ahead first: the match can only
            // replace the current one if it is strictly longer.
            if dict[(dict_head + match_len) & DICT_MASK] == dict[(off + match_len) & DICT_MASK] {
                let mut i = 0;
                while i < match_len
                    && dict[(dict_head + i) & DICT_MASK] == dict[(off + i) & DICT_MASK]
                {
                    i += 1;
                }

                if i >= match_len {
                    match_len += 1;
                    while match_len < waiting
                        && dict[(dict_head + match_len) & DICT_MASK]
                            == dict[(off + match_len) & DICT_MASK]
                    {
                        match_len += 1;
                    }
                    match_offset = offset;
                }
            }
            offset = hash.next[offset as usize];
        }

        if match_len < MIN_MATCH {
            match_len = 1;
            bs.write1(1)?;
            bs.write(8, u32::from(dict[dict_head]))?;
        } else {
            bs.write1(0)?;
            bs.write(13, match_offset)?;
            bs.write(4, (match_len - MIN_MATCH) as u32)?;
        }

        for _ in 0..match_len {
            let slot = (dict_head + MAX_MATCH) & DICT_MASK;

            if slot as u32 != HASH_NULL {
                hash.remove(generate_key(&dict, slot), slot as u32);
            }
            if dict_head as u32 != HASH_NULL {
                hash.add(dict_head_key, dict_head as u32);
            }

            if pos < input.len() {
                dict[slot] = input[pos];
                pos += 1;
            } else {
                waiting -= 1;
            }

            dict_head = (dict_head + 1) & DICT_MASK;
            dict_head_key = generate_key(&dict, dict_head);
        }
    }

    bs.write1(0)?;
    bs.write(13, HASH_NULL)?;
    bs.write(4, 0)?;
    bs.finish()?;

    Ok(bs.into_inner())
}

/// Decompress `input` until `output_size` bytes have been produced or the
/// offset-0 terminator is seen.
///
/// A premature terminator yields short output; callers that know the
/// expected size must check the returned length themselves.
pub fn decompress(input: &[u8], output_size: usize) -> Result<Vec<u8>, DatError> {
    let mut bs = BitReader::new(input);
    let mut dict = [0u8; DICT_SIZE];
    let mut dict_head: usize = 1;
    let mut out = Vec::with_capacity(output_size);

    while out.len() < output_size {
        if bs.read1()? == 1 {
            let c = bs.read(8)? as u8;
            out.push(c);
            dict[dict_head] = c;
            dict_head = (dict_head + 1) & DICT_MASK;
        } else {
            let match_offset = bs.read(13)? as usize;
            let match_len = bs.read(4)? as usize + MIN_MATCH;

            if match_offset == 0 {
                return Ok(out);
            }

            for i in 0..match_len {
                let c = dict[(match_offset + i) & DICT_MASK];
                out.push(c);
                dict[dict_head] = c;
                dict_head = (dict_head + 1) & DICT_MASK;
            }
        }
    }

    out.truncate(output_size);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_input_is_just_the_terminator() {
        // One flag bit, 13 offset bits and 4 length bits, zero-padded.
        assert_eq!(compress(&[]).unwrap(), vec![0, 0, 0]);
        assert_eq!(decompress(&[0, 0, 0], 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn short_literal_runs_round_trip() {
        let data = b"abcabcabcabc";
        let packed = compress(data).unwrap();
        assert_eq!(decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn repeating_data_uses_forward_matches() {
        let data = vec![0x41u8; 4096];
        let packed = compress(&data).unwrap();
        // One literal plus forward matches shrinks this to a handful of tokens.
        assert!(packed.len() < 64, "packed to {} bytes", packed.len());
        assert_eq!(decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn output_is_bounded_by_nine_eighths() {
        // Incompressible input: all 8-bit values in a pattern with no
        // 3-byte repeats inside the window.
        let data: Vec<u8> = (0u32..4096).map(|i| (i * 7 + i / 256) as u8).collect();
        let packed = compress(&data).unwrap();
        assert!(packed.len() <= data.len() * 9 / 8 + 4);
    }

    #[test]
    fn premature_terminator_yields_short_output() {
        let packed = compress(b"xy").unwrap();
        let out = decompress(&packed, 100).unwrap();
        assert_eq!(out, b"xy");
    }

    proptest! {
        #[test]
        fn round_trips_arbitrary_data(data in proptest::collection::vec(any::<u8>(), 0..0x4000)) {
            let packed = compress(&data).unwrap();
            let back = decompress(&packed, data.len()).unwrap();
            prop_assert_eq!(back, data);
        }

        #[test]
        fn round_trips_compressible_data(
            seed in proptest::collection::vec(any::<u8>(), 1..32),
            reps in 1usize..256,
        ) {
            let data: Vec<u8> = seed.iter().copied().cycle().take(seed.len() * reps).collect();
            let packed = compress(&data).unwrap();
            let back = decompress(&packed, data.len()).unwrap();
            prop_assert_eq!(back, data);
        }
    }
}
