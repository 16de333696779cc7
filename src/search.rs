use crate::error::ChatResult;
use crate::graph::Graph;
use crate::model::Seq2Seq;
use crate::tensor::Tensor;
use crate::vocab::SOS_TOKEN;

/// Greedy autoregressive decoding of a single input sequence.
///
/// Starting from SOS, every step feeds the previous arg-max token back into
/// the decoder. Decoding always runs for exactly `max_length` steps; an EOS in
/// the middle does not stop it, callers drop EOS and PAD from the result.
#[derive(Debug, Clone, Copy)]
pub struct GreedySearchDecoder<'a> {
    model: &'a Seq2Seq,
}

impl<'a> GreedySearchDecoder<'a> {
    /// Decoder over `model`.
    pub fn new(model: &'a Seq2Seq) -> Self {
        Self { model }
    }

    /// Decodes `input_seq` (`[T, 1]` token ids of length `input_length`).
    /// Returns the chosen tokens and their probabilities.
    pub fn search(
        &self,
        input_seq: &Tensor<usize>,
        input_length: usize,
        max_length: usize,
    ) -> ChatResult<(Vec<usize>, Vec<f32>)> {
        let mut graph = Graph::new();
        let bound = self.model.bind(&mut graph);
        let encoded = bound.encoder().forward(&mut graph, input_seq, &[input_length])?;
        let decoder = bound.decoder();
        let mut hidden = encoded.hidden[..decoder.n_layers()].to_vec();
        let mut decoder_input = SOS_TOKEN;

        let mut all_tokens = Vec::with_capacity(max_length);
        let mut all_scores = Vec::with_capacity(max_length);
        for _ in 0..max_length {
            let step = decoder.forward(&mut graph, &[decoder_input], &hidden, encoded.outputs)?;
            hidden = step.hidden;
            let (token, score) = graph.get(step.output)?.argmax_rows()?[0];
            all_tokens.push(token);
            all_scores.push(score);
            decoder_input = token;
        }
        Ok((all_tokens, all_scores))
    }
}
