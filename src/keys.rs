//! Internal key form: a user key with a packed sequence/kind trailer.
//!
//! The trailer is a little-endian u64 of `(sequence << 8) | kind`, appended
//! to the user key. SSTable metadata records its key range in this form, and
//! the manifest codec serializes the encoded bytes length-prefixed.

use crate::encoding::{get_fixed64, put_fixed64};
use crate::error::Result;
use crate::Error;

/// What an entry means for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Deletion = 0,
    Value = 1,
}

impl ValueKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ValueKind::Deletion),
            1 => Some(ValueKind::Value),
            _ => None,
        }
    }
}

/// An internal key: user key plus `(sequence, kind)` trailer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InternalKey {
    user_key: Vec<u8>,
    trailer: u64,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: u64, kind: ValueKind) -> Self {
        Self {
            user_key: user_key.to_vec(),
            trailer: (sequence << 8) | kind as u64,
        }
    }

    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    pub fn sequence(&self) -> u64 {
        self.trailer >> 8
    }

    pub fn kind(&self) -> Option<ValueKind> {
        ValueKind::from_u8(self.trailer as u8)
    }

    /// Serializes to `user_key ‖ fixed64(trailer)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + 8);
        buf.extend_from_slice(&self.user_key);
        put_fixed64(&mut buf, self.trailer);
        buf
    }

    /// Parses an encoded internal key. The trailer is mandatory; anything
    /// shorter than eight bytes is corrupt.
    pub fn decode(encoded: &[u8]) -> Result<Self> {
        if encoded.len() < 8 {
            return Err(Error::Corruption(format!(
                "internal key too short: {} bytes",
                encoded.len()
            )));
        }
        let split = encoded.len() - 8;
        let mut trailer_bytes = &encoded[split..];
        let trailer = get_fixed64(&mut trailer_bytes).expect("trailer slice is 8 bytes");
        Ok(Self {
            user_key: encoded[..split].to_vec(),
            trailer,
        })
    }
}
