//! Turning generated token ids back into slot value strings.
//!
//! Tokenization itself is owned by the feature-extraction pipeline; this
//! module only defines the seam the belief-state updater decodes through.

use std::collections::HashSet;

/// Converts a generated id sequence into a value string.
pub trait ValueDecoder {
    /// End-of-sequence id. Generation is truncated at its first occurrence.
    fn eos_id(&self) -> u32;

    /// Decode ids that have already been truncated at EOS.
    fn decode(&self, ids: &[u32]) -> String;

    /// Truncate at the first EOS and decode.
    fn decode_generated(&self, ids: &[u32]) -> String {
        self.decode(truncate_at_eos(ids, self.eos_id()))
    }
}

/// Prefix of `ids` before the first `eos_id`.
pub fn truncate_at_eos(ids: &[u32], eos_id: u32) -> &[u32] {
    match ids.iter().position(|&id| id == eos_id) {
        Some(end) => &ids[..end],
        None => ids,
    }
}

/// Decoder over an id → token table with WordPiece continuation merging.
#[derive(Debug, Clone)]
pub struct VocabularyDecoder {
    tokens: Vec<String>,
    eos_id: u32,
    skip_ids: HashSet<u32>,
}

impl VocabularyDecoder {
    pub fn new(tokens: Vec<String>, eos_id: u32) -> Self {
        Self {
            tokens,
            eos_id,
            skip_ids: HashSet::new(),
        }
    }

    /// Ids dropped from the output (pad, cls, sep and similar).
    pub fn with_skip_ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.skip_ids.extend(ids);
        self
    }

    pub fn vocab_size(&self) -> usize {
        self.tokens.len()
    }
}

impl ValueDecoder for VocabularyDecoder {
    fn eos_id(&self) -> u32 {
        self.eos_id
    }

    fn decode(&self, ids: &[u32]) -> String {
        let mut out = String::new();
        for &id in ids {
            if self.skip_ids.contains(&id) {
                continue;
            }
            let Some(token) = self.tokens.get(id as usize) else {
                continue;
            };
            if let Some(piece) = token.strip_prefix("##") {
                out.push_str(piece);
            } else {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(token);
            }
        }
        out
    }
}
