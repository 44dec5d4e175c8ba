//! Persisted rate bucket entries.
//!
//! Each list entry is the ASCII form `"{start}_{count}"`, which keeps the
//! persisted state greppable during incidents. Anything that does not
//! parse as exactly two integers is malformed; readers discard the entry
//! and keep going instead of failing the whole window read.

use types::RateBucket;

use crate::{CodecError, Result};

const SEPARATOR: char = '_';

pub fn encode_bucket(bucket: &RateBucket) -> Vec<u8> {
    format!("{}{}{}", bucket.start, SEPARATOR, bucket.count).into_bytes()
}

pub fn decode_bucket(raw: &[u8]) -> Result<RateBucket> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| CodecError::MalformedBucket(String::from_utf8_lossy(raw).into_owned()))?;
    let (start, count) = text
        .split_once(SEPARATOR)
        .ok_or_else(|| CodecError::MalformedBucket(text.to_string()))?;
    let start = start
        .parse::<u64>()
        .map_err(|_| CodecError::MalformedBucket(text.to_string()))?;
    let count = count
        .parse::<u64>()
        .map_err(|_| CodecError::MalformedBucket(text.to_string()))?;
    Ok(RateBucket::new(start, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_start_then_count() {
        assert_eq!(encode_bucket(&RateBucket::new(600, 5)), b"600_5".to_vec());
        assert_eq!(encode_bucket(&RateBucket::new(0, 0)), b"0_0".to_vec());
    }

    #[test]
    fn decodes_what_it_encodes() {
        let bucket = RateBucket::new(1_700_000_040, 123);
        assert_eq!(decode_bucket(&encode_bucket(&bucket)).unwrap(), bucket);
    }

    #[test]
    fn rejects_malformed_entries() {
        for bad in [
            &b""[..],
            b"600",
            b"600_",
            b"_5",
            b"600_5_9",
            b"abc_5",
            b"600_xyz",
            b"-600_5",
        ] {
            assert!(decode_bucket(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn rejects_non_utf8() {
        assert!(decode_bucket(&[0xff, 0xfe, b'_', b'1']).is_err());
    }
}
