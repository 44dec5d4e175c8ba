//! # ChainPulse Codec
//!
//! Wire formats shared by every writer and reader of the overview cache:
//!
//! - **Bucket entries**: the `"{start}_{count}"` encoding of persisted
//!   per-minute rate buckets
//! - **Cache keys**: one constructor per cached artifact, so writers and
//!   readers can never drift apart on key naming
//! - **Push frames**: the envelope delivered to live subscribers
//!
//! Decoding never panics. A malformed persisted entry surfaces as a
//! [`CodecError`] that callers downgrade to a logged warning.

use thiserror::Error;

pub mod bucket;
pub mod keys;
pub mod push;

pub use bucket::{decode_bucket, encode_bucket};
pub use push::PushEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed bucket entry {0:?}")]
    MalformedBucket(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
