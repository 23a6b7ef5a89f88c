// SPDX-License-Identifier: Apache-2.0

//! Incremental delimiter splitting.
//!
//! Data is fed in whatever chunk sizes the reader produces. Complete records
//! are returned as soon as their delimiter arrives; a partial trailing record
//! stays buffered until more data or an explicit [`BufferedTokenizer::flush`].

use bytes::{Bytes, BytesMut};

#[derive(Debug)]
pub struct BufferedTokenizer {
    delimiter: Vec<u8>,
    buffer: BytesMut,
}

impl BufferedTokenizer {
    /// `delimiter` must not be empty.
    pub fn new(delimiter: &[u8]) -> Self {
        debug_assert!(!delimiter.is_empty());
        Self {
            delimiter: delimiter.to_vec(),
            buffer: BytesMut::new(),
        }
    }

    /// Append `data` and return every record it completed, without delimiters.
    pub fn extract(&mut self, data: &[u8]) -> Vec<Bytes> {
        // a delimiter may straddle the old tail and the new data
        let mut search_from = self
            .buffer
            .len()
            .saturating_sub(self.delimiter.len().saturating_sub(1));
        self.buffer.extend_from_slice(data);

        let mut records = Vec::new();
        while let Some(pos) = find(&self.buffer[search_from..], &self.delimiter) {
            let record = self.buffer.split_to(search_from + pos).freeze();
            let _ = self.buffer.split_to(self.delimiter.len());
            records.push(record);
            search_from = 0;
        }
        records
    }

    /// Take whatever partial record is buffered.
    pub fn flush(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Discard the buffered partial record.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of buffered bytes not yet returned as a record.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|b| *b == needle[0]);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
