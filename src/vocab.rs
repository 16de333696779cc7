//! Word/index vocabulary and sentence normalization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Padding token index. Always 0.
pub const PAD_TOKEN: usize = 0;
/// Start-of-sentence token index.
pub const SOS_TOKEN: usize = 1;
/// End-of-sentence token index.
pub const EOS_TOKEN: usize = 2;

/// Word of [`PAD_TOKEN`].
pub const PAD_WORD: &str = "PAD";
/// Word of [`SOS_TOKEN`].
pub const SOS_WORD: &str = "SOS";
/// Word of [`EOS_TOKEN`].
pub const EOS_WORD: &str = "EOS";
/// Word unseen words map to when enabled.
pub const UNK_WORD: &str = "UNK";

/// Lookup failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VocabError {
    /// The word has no index and unknown-word mapping is disabled.
    #[error("unknown word: {0:?}")]
    UnknownWord(String),
    /// An index has no word.
    #[error("unknown index: {0}")]
    UnknownIndex(usize),
}

/// Bidirectional word/index mapping with word counts.
///
/// Indices 0..3 are reserved for PAD, SOS and EOS. When unknown-word mapping is
/// enabled, `UNK` takes the next index and absorbs every unseen word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Usually the corpus name.
    pub name: String,
    trimmed: bool,
    word2index: HashMap<String, usize>,
    word2count: HashMap<String, usize>,
    index2word: Vec<String>,
    unk_index: Option<usize>,
}

impl Vocabulary {
    /// Empty vocabulary holding only the reserved tokens.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            trimmed: false,
            word2index: HashMap::new(),
            word2count: HashMap::new(),
            index2word: vec![PAD_WORD.to_string(), SOS_WORD.to_string(), EOS_WORD.to_string()],
            unk_index: None,
        }
    }

    /// Adds `UNK` (once) and maps unseen words to it from now on.
    pub fn enable_unknown(&mut self) {
        if self.unk_index.is_none() {
            self.unk_index = Some(self.index2word.len());
            self.index2word.push(UNK_WORD.to_string());
        }
    }

    /// Index of `UNK`, if enabled.
    pub fn unknown_index(&self) -> Option<usize> {
        self.unk_index
    }

    /// Number of words including reserved tokens.
    pub fn num_words(&self) -> usize {
        self.index2word.len()
    }

    /// Whether [`Vocabulary::trim`] already ran.
    pub fn is_trimmed(&self) -> bool {
        self.trimmed
    }

    /// Adds every word of `sentence`, split on single spaces. An empty
    /// sentence adds the empty word.
    pub fn add_sentence(&mut self, sentence: &str) {
        for word in sentence.split(' ') {
            self.add_word(word);
        }
    }

    /// Adds `word`, or bumps its count if already known.
    pub fn add_word(&mut self, word: &str) {
        if let Some(count) = self.word2count.get_mut(word) {
            *count += 1;
            return;
        }
        self.word2index.insert(word.to_string(), self.index2word.len());
        self.word2count.insert(word.to_string(), 1);
        self.index2word.push(word.to_string());
    }

    /// Index of `word`, ignoring `UNK`.
    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.word2index.get(word).copied()
    }

    /// Word at `index`.
    pub fn word_of(&self, index: usize) -> Result<&str, VocabError> {
        self.index2word
            .get(index)
            .map(String::as_str)
            .ok_or(VocabError::UnknownIndex(index))
    }

    /// Times `word` was added; 0 when unknown.
    pub fn count_of(&self, word: &str) -> usize {
        self.word2count.get(word).copied().unwrap_or(0)
    }

    /// Drops words seen fewer than `min_count` times and rebuilds the indices.
    /// Runs at most once per vocabulary.
    pub fn trim(&mut self, min_count: usize) {
        if self.trimmed {
            return;
        }
        self.trimmed = true;

        let mut keep: Vec<(String, usize)> = self
            .index2word
            .iter()
            .filter_map(|w| self.word2count.get(w).map(|&c| (w.clone(), c)))
            .filter(|(_, c)| *c >= min_count)
            .collect();
        let before = self.word2index.len();
        info!(
            kept = keep.len(),
            total = before,
            "keep_words {} / {} = {:.4}",
            keep.len(),
            before,
            if before == 0 { 0.0 } else { keep.len() as f32 / before as f32 }
        );

        let had_unk = self.unk_index.is_some();
        *self = Self::new(&self.name);
        if had_unk {
            self.enable_unknown();
        }
        for (word, count) in keep.drain(..) {
            self.add_word(&word);
            self.word2count.insert(word, count);
        }
        self.trimmed = true;
    }

    /// Index sequence of a normalized sentence followed by EOS.
    ///
    /// Words are split on single spaces the same way [`Vocabulary::add_sentence`]
    /// splits them, so an empty sentence looks up the empty word.
    ///
    /// # Errors
    /// [`VocabError::UnknownWord`] for an unseen word when `UNK` is disabled.
    pub fn indexes_from_sentence(&self, sentence: &str) -> Result<Vec<usize>, VocabError> {
        let mut indexes = Vec::new();
        for word in sentence.split(' ') {
            match self.index_of(word).or(self.unk_index) {
                Some(i) => indexes.push(i),
                None => return Err(VocabError::UnknownWord(word.to_string())),
            }
        }
        indexes.push(EOS_TOKEN);
        Ok(indexes)
    }
}

/// Lowercases, folds accents (NFD with combining marks dropped), splits `.!?`
/// from the preceding word and replaces every other character that is not an
/// ASCII letter with a space. Runs of spaces collapse.
pub fn normalize_string(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut out = String::with_capacity(lower.len() + 8);
    for c in lower.trim().nfd().filter(|&c| !is_combining_mark(c)) {
        match c {
            '.' | '!' | '?' => {
                out.push(' ');
                out.push(c);
            }
            c if c.is_ascii_alphabetic() => out.push(c),
            _ => out.push(' '),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_vocab() -> Vocabulary {
        let mut voc = Vocabulary::new("test");
        voc.add_sentence("hi bot");
        voc
    }

    #[test]
    fn reserved_tokens_come_first() {
        let voc = small_vocab();
        assert_eq!(voc.word_of(PAD_TOKEN).unwrap(), "PAD");
        assert_eq!(voc.word_of(SOS_TOKEN).unwrap(), "SOS");
        assert_eq!(voc.word_of(EOS_TOKEN).unwrap(), "EOS");
        assert_eq!(voc.index_of("hi"), Some(3));
        assert_eq!(voc.index_of("bot"), Some(4));
        assert_eq!(voc.num_words(), 5);
    }

    #[test]
    fn sentence_gets_eos_appended() {
        let voc = small_vocab();
        assert_eq!(voc.indexes_from_sentence("hi").unwrap(), vec![3, 2]);
    }

    #[test]
    fn unknown_word_is_a_lookup_failure() {
        let voc = small_vocab();
        assert_eq!(
            voc.indexes_from_sentence("hi there"),
            Err(VocabError::UnknownWord("there".to_string()))
        );
    }

    #[test]
    fn unknown_word_maps_to_unk_when_enabled() {
        let mut voc = small_vocab();
        voc.enable_unknown();
        let unk = voc.unknown_index().unwrap();
        assert_eq!(voc.indexes_from_sentence("hi there").unwrap(), vec![3, unk, EOS_TOKEN]);
    }

    #[test]
    fn index_word_round_trip() {
        let mut voc = small_vocab();
        voc.add_sentence("how are you ?");
        for i in 0..voc.num_words() {
            let word = voc.word_of(i).unwrap().to_string();
            if i > EOS_TOKEN {
                assert_eq!(voc.index_of(&word), Some(i));
            }
        }
    }

    #[test]
    fn counts_accumulate() {
        let mut voc = small_vocab();
        voc.add_sentence("hi hi");
        assert_eq!(voc.count_of("hi"), 3);
        assert_eq!(voc.count_of("bot"), 1);
    }

    #[test]
    fn trim_drops_rare_words_and_reindexes() {
        let mut voc = Vocabulary::new("test");
        voc.add_sentence("a b b c c c");
        voc.trim(2);
        assert!(voc.is_trimmed());
        assert_eq!(voc.index_of("a"), None);
        assert_eq!(voc.index_of("b"), Some(3));
        assert_eq!(voc.index_of("c"), Some(4));
        assert_eq!(voc.count_of("c"), 3);
        // Second call is a no-op.
        voc.trim(10);
        assert_eq!(voc.num_words(), 5);
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_string("Hi!"), "hi !");
        assert_eq!(normalize_string("  How are   you?? "), "how are you ? ?");
        assert_eq!(normalize_string("It's 5 o'clock."), "it s o clock .");
    }

    #[test]
    fn accents_are_folded() {
        assert_eq!(normalize_string("Café au lait!"), "cafe au lait !");
        assert_eq!(normalize_string("NAÏVE résumé"), "naive resume");
        // No decomposition: still a word break.
        assert_eq!(normalize_string("straße"), "stra e");
    }

    #[test]
    fn empty_sentence_looks_up_the_empty_word() {
        let mut voc = small_vocab();
        assert_eq!(voc.indexes_from_sentence(""), Err(VocabError::UnknownWord(String::new())));
        voc.add_sentence("");
        assert_eq!(voc.indexes_from_sentence("").unwrap(), vec![5, EOS_TOKEN]);
    }
}
