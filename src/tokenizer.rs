use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Character-level vocabulary built from a corpus.
///
/// Ids are assigned to the distinct characters in ascending order, so the same
/// corpus always produces the same id for the same character.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    chars: Vec<char>,
    ids: HashMap<char, i64>,
}

impl Tokenizer {
    pub fn from_corpus(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect::<BTreeSet<_>>().into_iter().collect();
        let ids = chars
            .iter()
            .enumerate()
            .map(|(id, &c)| (c, id as i64))
            .collect();
        Tokenizer { chars, ids }
    }

    pub fn vocab_size(&self) -> usize {
        self.chars.len()
    }

    /// The vocabulary in id order.
    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn encode(&self, text: &str) -> Result<Vec<i64>> {
        text.chars()
            .map(|c| self.ids.get(&c).copied().ok_or(Error::UnknownCharacter(c)))
            .collect()
    }

    pub fn decode(&self, tokens: &[i64]) -> Result<String> {
        tokens
            .iter()
            .map(|&id| {
                usize::try_from(id)
                    .ok()
                    .and_then(|i| self.chars.get(i).copied())
                    .ok_or(Error::UnknownId(id))
            })
            .collect()
    }
}
