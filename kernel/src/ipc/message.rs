//! IPC message buffer
//!
//! Every task owns one buffer. A short message keeps everything inline:
//!
//! ```text
//! words: [ cap idx | cap idx | data | data | data | .. unused .. ]
//!          \__ cap_count __/  \______ data_count ______/
//! ```
//!
//! A long message moves its capability indices to an out-of-line table and
//! uses all of `words` for data. Messages with no capabilities and no table
//! are eligible for the direct-switch fast path.
//!
//! ## Header word
//!
//! The layout crosses the system-call boundary as one word:
//! `cap_count | data_count << 8 | long << 16`.

use alloc::vec::Vec;

use crate::config::MSG_WORDS;
use crate::error::{Error, Result};
use crate::objects::CapIndex;

const LONG_FLAG: u64 = 1 << 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBuffer {
    cap_count: u8,
    data_count: u8,
    words: [u64; MSG_WORDS],
    cap_table: Option<Vec<u64>>,
}

impl MessageBuffer {
    pub const fn new() -> Self {
        Self { cap_count: 0, data_count: 0, words: [0; MSG_WORDS], cap_table: None }
    }

    /// Data-only message
    pub fn from_data(data: &[u64]) -> Result<Self> {
        Self::with_caps(&[], data)
    }

    /// Short message with inline capability indices
    pub fn with_caps(caps: &[CapIndex], data: &[u64]) -> Result<Self> {
        if caps.len() + data.len() > MSG_WORDS {
            return Err(Error::IllegalArgument);
        }
        let mut msg = Self::new();
        for (word, &cap) in msg.words.iter_mut().zip(caps) {
            *word = cap as u64;
        }
        msg.words[caps.len()..caps.len() + data.len()].copy_from_slice(data);
        msg.cap_count = caps.len() as u8;
        msg.data_count = data.len() as u8;
        Ok(msg)
    }

    /// Long message: capability indices travel in an out-of-line table
    pub fn with_cap_table(caps: &[CapIndex], data: &[u64]) -> Result<Self> {
        if data.len() > MSG_WORDS || caps.len() > u8::MAX as usize {
            return Err(Error::IllegalArgument);
        }
        let mut msg = Self::new();
        msg.words[..data.len()].copy_from_slice(data);
        msg.cap_count = caps.len() as u8;
        msg.data_count = data.len() as u8;
        msg.cap_table = Some(caps.iter().map(|&c| c as u64).collect());
        Ok(msg)
    }

    /// Rebuild a short message from its header and inline words
    pub fn decode(header: u64, words: &[u64; MSG_WORDS]) -> Result<Self> {
        if header & LONG_FLAG != 0 || header >> 17 != 0 {
            return Err(Error::IllegalArgument);
        }
        let caps = (header & 0xff) as usize;
        let data = ((header >> 8) & 0xff) as usize;
        if caps + data > MSG_WORDS {
            return Err(Error::IllegalArgument);
        }
        Ok(Self { cap_count: caps as u8, data_count: data as u8, words: *words, cap_table: None })
    }

    pub fn header(&self) -> u64 {
        let long = if self.is_long() { LONG_FLAG } else { 0 };
        self.cap_count as u64 | (self.data_count as u64) << 8 | long
    }

    #[inline]
    pub fn cap_count(&self) -> usize {
        self.cap_count as usize
    }

    #[inline]
    pub fn data_count(&self) -> usize {
        self.data_count as usize
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        self.cap_table.is_some()
    }

    /// No capabilities and no out-of-line table
    #[inline]
    pub fn is_short(&self) -> bool {
        self.cap_count == 0 && !self.is_long()
    }

    /// Capability indices, inline or from the table
    pub fn cap_indices(&self) -> &[u64] {
        match &self.cap_table {
            Some(table) => table,
            None => &self.words[..self.cap_count()],
        }
    }

    pub fn data(&self) -> &[u64] {
        let start = if self.is_long() { 0 } else { self.cap_count() };
        &self.words[start..start + self.data_count()]
    }

    /// Raw inline words
    pub fn words(&self) -> &[u64; MSG_WORDS] {
        &self.words
    }

    /// Same layout and data with the capability entries replaced
    pub(crate) fn with_rewritten_caps(&self, indices: &[u64]) -> Self {
        debug_assert_eq!(indices.len(), self.cap_count());
        let mut out = self.clone();
        match &mut out.cap_table {
            Some(table) => table.copy_from_slice(indices),
            None => out.words[..indices.len()].copy_from_slice(indices),
        }
        out
    }
}
