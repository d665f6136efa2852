//! Stage one: entity screening
//!
//! Keeps the sentences of a page that carry the named entities the target
//! relation needs and are short enough to be worth a full parse.

use ise_core::{AnnotatedSentence, EntityCounts, Relation};

/// Split page text into candidate lines, dropping blank ones
pub fn candidate_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// ASCII-only copy of a sentence with `|` removed
pub fn clean_sentence(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii() && *c != '|')
        .collect()
}

/// Entity-density and length filter for lightly annotated sentences
#[derive(Debug, Clone, Copy)]
pub struct SentenceScreen {
    token_limit: usize,
}

impl SentenceScreen {
    /// Sentences with `token_limit` tokens or more are dropped
    pub fn new(token_limit: usize) -> Self {
        Self { token_limit }
    }

    /// Whether one sentence passes for the relation
    pub fn passes(&self, sentence: &AnnotatedSentence, relation: Relation) -> bool {
        if sentence.tokens.len() >= self.token_limit {
            return false;
        }
        relation.admits(&EntityCounts::from_tokens(&sentence.tokens))
    }

    /// Plain-text sentences that pass, in document order
    pub fn screen(&self, sentences: &[AnnotatedSentence], relation: Relation) -> Vec<String> {
        sentences
            .iter()
            .filter(|s| self.passes(s, relation))
            .map(|s| clean_sentence(&s.text()))
            .filter(|s| !s.trim().is_empty())
            .collect()
    }
}

impl Default for SentenceScreen {
    fn default() -> Self {
        Self::new(50)
    }
}
