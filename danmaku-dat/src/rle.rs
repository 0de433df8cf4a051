//! Run-length codec used by the legacy container family.
//!
//! A byte is emitted verbatim; when two equal bytes appear in a row, a
//! count byte follows giving the number of further repeats. Runs longer
//! than 257 bytes chain into a fresh pair-plus-count group.

/// Run-length encode `input`.
pub fn rle(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let b = input[i];
        out.push(b);
        i += 1;

        if i < input.len() && input[i] == b {
            out.push(b);
            i += 1;

            let mut count = 0u8;
            while i < input.len() && input[i] == b && count < u8::MAX {
                count += 1;
                i += 1;
            }
            out.push(count);
        }
    }

    out
}

/// Decode a run-length stream produced by [`rle`].
pub fn unrle(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut i = 0;

    while i < input.len() {
        let b = input[i];
        out.push(b);
        i += 1;

        if i < input.len() && input[i] == b {
            out.push(b);
            i += 1;

            if i < input.len() {
                let count = input[i];
                i += 1;
                out.extend(std::iter::repeat(b).take(usize::from(count)));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pairs_carry_a_count() {
        assert_eq!(rle(&[7, 7]), vec![7, 7, 0]);
        assert_eq!(rle(&[7, 7, 7, 7]), vec![7, 7, 2]);
        assert_eq!(unrle(&[7, 7, 2]), vec![7, 7, 7, 7]);
    }

    #[test]
    fn long_runs_chain() {
        let data = vec![3u8; 300];
        let packed = rle(&data);
        assert_eq!(packed, vec![3, 3, 255, 3, 3, 41]);
        assert_eq!(unrle(&packed), data);
    }

    #[test]
    fn mixed_data_round_trips() {
        let data = b"aabbbbccd\x00\x00\x00e";
        assert_eq!(unrle(&rle(data)), data);
    }

    proptest! {
        #[test]
        fn round_trips_arbitrary_data(data in proptest::collection::vec(any::<u8>(), 0..0x2000)) {
            prop_assert_eq!(unrle(&rle(&data)), data);
        }
    }
}
