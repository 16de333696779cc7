//! Corpus loading and batch construction.

use crate::error::{ChatResult, ChatbotError};
use crate::tensor::Tensor;
use crate::vocab::{normalize_string, VocabError, Vocabulary, PAD_TOKEN};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// A query sentence and its reply, both normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentencePair {
    /// Query sentence.
    pub input: String,
    /// Reply sentence.
    pub output: String,
}

impl SentencePair {
    /// Pair of already normalized sentences.
    pub fn new(input: &str, output: &str) -> Self {
        Self {
            input: input.to_string(),
            output: output.to_string(),
        }
    }
}

fn word_count(sentence: &str) -> usize {
    sentence.split(' ').count()
}

/// Reads a tab-separated pair file and normalizes both sides of every line.
/// Lines without a tab are skipped.
pub fn load_pairs(path: &Path) -> ChatResult<Vec<SentencePair>> {
    info!("Reading lines from {:?}", path);
    let text = fs::read_to_string(path)?;
    let mut pairs = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let mut fields = line.split('\t');
        match (fields.next(), fields.next()) {
            (Some(input), Some(output)) => {
                pairs.push(SentencePair::new(&normalize_string(input), &normalize_string(output)));
            }
            _ if line.trim().is_empty() => {}
            _ => warn!(line = lineno + 1, "skipping line without a tab-separated reply"),
        }
    }
    Ok(pairs)
}

/// Keeps pairs whose both sides have fewer than `max_length` words.
pub fn filter_pairs(pairs: Vec<SentencePair>, max_length: usize) -> Vec<SentencePair> {
    pairs
        .into_iter()
        .filter(|p| word_count(&p.input) < max_length && word_count(&p.output) < max_length)
        .collect()
}

/// Loads, filters and indexes a corpus.
pub fn load_prepare_data(
    corpus_name: &str,
    path: &Path,
    max_length: usize,
) -> ChatResult<(Vocabulary, Vec<SentencePair>)> {
    info!("Start preparing training data ...");
    let pairs = load_pairs(path)?;
    info!("Read {} sentence pairs", pairs.len());
    let pairs = filter_pairs(pairs, max_length);
    info!("Trimmed to {} sentence pairs", pairs.len());

    let mut voc = Vocabulary::new(corpus_name);
    for pair in &pairs {
        voc.add_sentence(&pair.input);
        voc.add_sentence(&pair.output);
    }
    info!("Counted words: {}", voc.num_words());
    Ok((voc, pairs))
}

/// Trims rare words from `voc`, then drops every pair that uses one of them.
pub fn trim_rare_words(
    voc: &mut Vocabulary,
    pairs: Vec<SentencePair>,
    min_count: usize,
) -> Vec<SentencePair> {
    voc.trim(min_count);
    let before = pairs.len();
    let known = |s: &str| s.split(' ').all(|w| voc.index_of(w).is_some());
    let kept: Vec<SentencePair> = pairs
        .into_iter()
        .filter(|p| known(&p.input) && known(&p.output))
        .collect();
    info!(
        "Trimmed from {} pairs to {}, {:.4} of total",
        before,
        kept.len(),
        if before == 0 { 0.0 } else { kept.len() as f32 / before as f32 }
    );
    kept
}

/// One training batch in length-major layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `[max_input_len, batch]` padded input ids.
    pub input: Tensor<usize>,
    /// Unpadded input length of every sequence.
    pub lengths: Vec<usize>,
    /// `[max_target_len, batch]` padded target ids.
    pub target: Tensor<usize>,
    /// Same shape as `target`; true where the target is not PAD.
    pub mask: Tensor<bool>,
    /// Rows of `target`.
    pub max_target_len: usize,
}

impl Batch {
    /// Number of sentence pairs.
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }
}

/// Transposes a list of sequences into a `[max_len, n]` matrix padded with PAD.
fn zero_padding(seqs: &[Vec<usize>]) -> ChatResult<Tensor<usize>> {
    let max_len = seqs.iter().map(Vec::len).max().unwrap_or(0);
    let mut blob = vec![PAD_TOKEN; max_len * seqs.len()];
    for (b, seq) in seqs.iter().enumerate() {
        for (t, &idx) in seq.iter().enumerate() {
            blob[t * seqs.len() + b] = idx;
        }
    }
    Ok(Tensor::raw(&[max_len, seqs.len()], blob)?)
}

/// Builds a batch from pairs, sorted by input length, longest first.
///
/// # Errors
/// Unknown words surface as [`VocabError::UnknownWord`]; an empty slice is a
/// data error.
pub fn batch_to_train_data(voc: &Vocabulary, pairs: &[SentencePair]) -> ChatResult<Batch> {
    if pairs.is_empty() {
        return Err(ChatbotError::Data("cannot build a batch from zero pairs".to_string()));
    }
    let mut sorted: Vec<&SentencePair> = pairs.iter().collect();
    sorted.sort_by_key(|p| std::cmp::Reverse(word_count(&p.input)));

    let inputs = sorted
        .iter()
        .map(|p| voc.indexes_from_sentence(&p.input))
        .collect::<Result<Vec<_>, VocabError>>()?;
    let outputs = sorted
        .iter()
        .map(|p| voc.indexes_from_sentence(&p.output))
        .collect::<Result<Vec<_>, VocabError>>()?;

    let lengths = inputs.iter().map(Vec::len).collect();
    let input = zero_padding(&inputs)?;
    let target = zero_padding(&outputs)?;
    let mask = target.map_values(|&t| t != PAD_TOKEN);
    let max_target_len = target.shape()[0];

    Ok(Batch {
        input,
        lengths,
        target,
        mask,
        max_target_len,
    })
}

/// Samples `batch_size` pairs with replacement and builds a batch from them.
pub fn sample_batch<R: Rng>(
    rng: &mut R,
    voc: &Vocabulary,
    pairs: &[SentencePair],
    batch_size: usize,
) -> ChatResult<Batch> {
    let chosen: Vec<SentencePair> = (0..batch_size)
        .filter_map(|_| pairs.choose(rng).cloned())
        .collect();
    batch_to_train_data(voc, &chosen)
}
