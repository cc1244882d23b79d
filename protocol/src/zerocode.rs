//! Run-length coding of zero bytes.
//!
//! Each run of zero bytes is written as `0x00` followed by the run length
//! (1..=255). Longer runs are split. Non-zero bytes pass through unchanged.

use crate::error::DecodeError;

/// Upper bound on a zero-decoded body.
pub const MAX_EXPANDED_LEN: usize = 8192;

pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut run: u8 = 0;

    for &byte in input {
        if byte == 0 {
            if run == u8::MAX {
                out.extend_from_slice(&[0, run]);
                run = 0;
            }
            run += 1;
        } else {
            if run > 0 {
                out.extend_from_slice(&[0, run]);
                run = 0;
            }
            out.push(byte);
        }
    }

    if run > 0 {
        out.extend_from_slice(&[0, run]);
    }
    out
}

pub fn decode(input: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut bytes = input.iter();

    while let Some(&byte) = bytes.next() {
        if byte == 0 {
            let run = *bytes.next().ok_or(DecodeError::ZeroRunTruncated)? as usize;
            if out.len() + run > MAX_EXPANDED_LEN {
                return Err(DecodeError::ZeroExpansionTooLarge {
                    max: MAX_EXPANDED_LEN,
                });
            }
            out.resize(out.len() + run, 0);
        } else {
            if out.len() >= MAX_EXPANDED_LEN {
                return Err(DecodeError::ZeroExpansionTooLarge {
                    max: MAX_EXPANDED_LEN,
                });
            }
            out.push(byte);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_runs() {
        assert_eq!(encode(&[1, 0, 0, 0, 2]), vec![1, 0, 3, 2]);
        assert_eq!(encode(&[0]), vec![0, 1]);
        assert_eq!(encode(&[5, 6]), vec![5, 6]);
    }

    #[test]
    fn test_long_run_is_split() {
        let input = vec![0u8; 300];
        assert_eq!(encode(&input), vec![0, 255, 0, 45]);
        assert_eq!(decode(&encode(&input)).unwrap(), input);
    }

    #[test]
    fn test_decode_missing_count() {
        assert_eq!(decode(&[7, 0]), Err(DecodeError::ZeroRunTruncated));
    }

    #[test]
    fn test_decode_expansion_limit() {
        let bomb: Vec<u8> = std::iter::repeat([0u8, 255]).take(40).flatten().collect();
        assert!(matches!(
            decode(&bomb),
            Err(DecodeError::ZeroExpansionTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(input in proptest::collection::vec(prop_oneof![Just(0u8), any::<u8>()], 0..2048)) {
            let encoded = encode(&input);
            prop_assert_eq!(decode(&encoded).unwrap(), input);
        }

        #[test]
        fn prop_encoded_has_no_bare_zero_pairs(input in proptest::collection::vec(any::<u8>(), 0..512)) {
            // Every zero in the output is a run marker followed by a non-zero count.
            let encoded = encode(&input);
            let mut i = 0;
            while i < encoded.len() {
                if encoded[i] == 0 {
                    prop_assert!(i + 1 < encoded.len());
                    prop_assert!(encoded[i + 1] > 0);
                    i += 2;
                } else {
                    i += 1;
                }
            }
        }
    }
}
