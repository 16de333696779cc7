//! Turning raw sentences into bot replies, interactively or from a file.

use crate::error::ChatResult;
use crate::search::GreedySearchDecoder;
use crate::tensor::Tensor;
use crate::vocab::{normalize_string, VocabError, Vocabulary, EOS_WORD, PAD_WORD};
use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;
use tracing::info;

const UNKNOWN_WORD_MESSAGE: &str = "Error: Encountered unknown word.";

/// Greedy decoder plus the vocabulary it speaks.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    searcher: GreedySearchDecoder<'a>,
    voc: &'a Vocabulary,
    max_length: usize,
}

impl<'a> Evaluator<'a> {
    /// Evaluator decoding up to `max_length` words.
    pub fn new(searcher: GreedySearchDecoder<'a>, voc: &'a Vocabulary, max_length: usize) -> Self {
        Self {
            searcher,
            voc,
            max_length,
        }
    }

    /// Decodes a normalized sentence into `max_length` words, EOS and PAD included.
    ///
    /// # Errors
    /// [`VocabError::UnknownWord`] when the sentence uses a word the vocabulary
    /// does not know.
    pub fn evaluate(&self, sentence: &str) -> ChatResult<Vec<String>> {
        let indexes = self.voc.indexes_from_sentence(sentence)?;
        let length = indexes.len();
        let input = Tensor::raw(&[length, 1], indexes)?;
        let (tokens, _scores) = self.searcher.search(&input, length, self.max_length)?;
        let words = tokens
            .into_iter()
            .map(|t| self.voc.word_of(t).map(str::to_string))
            .collect::<Result<Vec<_>, VocabError>>()?;
        Ok(words)
    }

    /// Normalizes a raw sentence and returns the reply without EOS and PAD.
    pub fn respond(&self, raw: &str) -> ChatResult<String> {
        let words = self.evaluate(&normalize_string(raw))?;
        Ok(words
            .into_iter()
            .filter(|w| w != EOS_WORD && w != PAD_WORD)
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Prints `Bot: <reply>`, or the unknown-word message. Other errors propagate.
    fn reply<W: Write>(&self, raw: &str, out: &mut W) -> ChatResult<()> {
        match self.respond(raw) {
            Ok(response) => writeln!(out, "Bot: {response}")?,
            Err(e) if e.is_unknown_word() => writeln!(out, "{UNKNOWN_WORD_MESSAGE}")?,
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Chat loop: prompts with `> ` and answers every line of `input` until
    /// `q`, `quit` or end of input.
    pub fn evaluate_input<R: BufRead, W: Write>(&self, mut input: R, out: &mut W) -> ChatResult<()> {
        let mut line = String::new();
        loop {
            write!(out, "> ")?;
            out.flush()?;
            line.clear();
            if input.read_line(&mut line)? == 0 {
                break;
            }
            let sentence = line.trim_end_matches(['\r', '\n']);
            if sentence == "q" || sentence == "quit" {
                break;
            }
            self.reply(sentence, out)?;
        }
        Ok(())
    }

    /// Echoes `sentence` after a blank line, then answers it.
    pub fn evaluate_example<W: Write>(&self, sentence: &str, out: &mut W) -> ChatResult<()> {
        writeln!(out, "\n> {sentence}")?;
        self.reply(sentence, out)
    }

    /// Answers every line of a UTF-8 file.
    pub fn evaluate_file<W: Write>(&self, path: &Path, out: &mut W) -> ChatResult<()> {
        info!("Evaluating sentences from {:?}", path);
        let text = fs::read_to_string(path)?;
        for line in text.lines() {
            self.evaluate_example(line.trim(), out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttnModel;
    use crate::model::tests::tiny_config;
    use crate::model::Seq2Seq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Cursor;

    fn setup() -> (Seq2Seq, Vocabulary) {
        let mut voc = Vocabulary::new("test");
        voc.add_sentence("hi bot");
        let model = Seq2Seq::new(&mut StdRng::seed_from_u64(3), &tiny_config(AttnModel::Dot), voc.num_words()).unwrap();
        (model, voc)
    }

    #[test]
    fn evaluate_decodes_max_length_words() {
        let (model, voc) = setup();
        let evaluator = Evaluator::new(GreedySearchDecoder::new(&model), &voc, 7);
        let words = evaluator.evaluate("hi").unwrap();
        assert_eq!(words.len(), 7);
        // "!" is not in the vocabulary.
        assert!(evaluator.respond("Hi!!").unwrap_err().is_unknown_word());
        let reply = evaluator.respond("HI bot").unwrap();
        assert!(reply.split(' ').all(|w| w != EOS_WORD && w != PAD_WORD));
    }

    #[test]
    fn unknown_word_is_the_only_failure() {
        let (model, voc) = setup();
        let evaluator = Evaluator::new(GreedySearchDecoder::new(&model), &voc, 5);
        let err = evaluator.evaluate("hi stranger").unwrap_err();
        assert!(err.is_unknown_word());
    }

    #[test]
    fn sentence_without_words_is_unknown() {
        let (model, voc) = setup();
        let evaluator = Evaluator::new(GreedySearchDecoder::new(&model), &voc, 5);
        for raw in ["", "123", "   "] {
            assert!(evaluator.respond(raw).unwrap_err().is_unknown_word(), "{raw:?}");
        }
        let mut out = Vec::new();
        evaluator.evaluate_example("", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("\n> \n{UNKNOWN_WORD_MESSAGE}\n"));
    }

    #[test]
    fn interactive_loop_reports_and_continues_until_quit() {
        let (model, voc) = setup();
        let evaluator = Evaluator::new(GreedySearchDecoder::new(&model), &voc, 5);
        let input = Cursor::new("hi\nwho are you\nbot\nquit\nhi\n");
        let mut out = Vec::new();
        evaluator.evaluate_input(input, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Bot: ").count(), 2);
        assert_eq!(text.matches(UNKNOWN_WORD_MESSAGE).count(), 1);
        assert_eq!(text.matches("> ").count(), 4);
    }

    #[test]
    fn interactive_loop_stops_at_end_of_input() {
        let (model, voc) = setup();
        let evaluator = Evaluator::new(GreedySearchDecoder::new(&model), &voc, 3);
        let mut out = Vec::new();
        evaluator.evaluate_input(Cursor::new("bot"), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("> Bot: "));
    }

    #[test]
    fn file_mode_echoes_every_line() {
        let (model, voc) = setup();
        let evaluator = Evaluator::new(GreedySearchDecoder::new(&model), &voc, 3);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        fs::write(&path, "hi\n  bot \nnobody\n").unwrap();
        let mut out = Vec::new();
        evaluator.evaluate_file(&path, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("\n> hi\nBot: "));
        assert!(text.contains("\n> bot\nBot: "));
        assert!(text.ends_with(&format!("\n> nobody\n{UNKNOWN_WORD_MESSAGE}\n")));
    }
}
