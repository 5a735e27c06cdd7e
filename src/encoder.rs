//! Bidirectional recurrent encoder.
//!
//! Each direction carries one hidden vector starting at zero. At every source
//! position the token embedding is concatenated with the carried state and
//! passed through a direction specific affine map and ELU. The per-position
//! output is `[left_to_right, right_to_left]`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::batch::TokenMatrix;
use crate::tensor::{add_assign, concat, elu_backward, elu_inplace, Embedding, Linear};
use crate::Token;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoder {
    pub embedding: Embedding,
    pub rnn_right: Linear,
    pub rnn_left: Linear,
}

/// Forward activations kept for backpropagation.
#[derive(Debug, Clone)]
struct DirectionTrace {
    inputs: Vec<Vec<f32>>,
    hidden: Vec<Vec<f32>>,
}

/// Encoder result for a batch: `states[b][pos]` has width `2 * hidden`.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub states: Vec<Vec<Vec<f32>>>,
    ids: Vec<Vec<i64>>,
    traces: Vec<[DirectionTrace; 2]>,
}

impl EncoderOutput {
    pub fn batch_size(&self) -> usize {
        self.states.len()
    }

    pub fn source_len(&self) -> usize {
        self.states.first().map_or(0, Vec::len)
    }
}

fn positions(len: usize, reverse: bool) -> Box<dyn Iterator<Item = usize>> {
    if reverse {
        Box::new((0..len).rev())
    } else {
        Box::new(0..len)
    }
}

impl Encoder {
    pub fn new<R: Rng + ?Sized>(vocab: usize, emb_size: usize, hidden: usize, rng: &mut R) -> Self {
        Self {
            embedding: Embedding::new(vocab, emb_size, rng),
            rnn_right: Linear::new(emb_size + hidden, hidden, rng),
            rnn_left: Linear::new(emb_size + hidden, hidden, rng),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            embedding: self.embedding.zeros_like(),
            rnn_right: self.rnn_right.zeros_like(),
            rnn_left: self.rnn_left.zeros_like(),
        }
    }

    pub fn vocab(&self) -> usize {
        self.embedding.vocab()
    }

    pub fn hidden_size(&self) -> usize {
        self.rnn_right.output_size()
    }

    /// Width of each encoded position.
    pub fn output_size(&self) -> usize {
        2 * self.hidden_size()
    }

    pub fn forward(&self, source: &TokenMatrix) -> EncoderOutput {
        let rows: Vec<Vec<i64>> = (0..source.rows())
            .map(|r| source.row(r).iter().map(|&t| t as i64).collect())
            .collect();
        self.forward_ids(rows)
    }

    /// Encode one unpadded token sequence as a batch of one.
    pub fn encode_tokens(&self, tokens: &[Token]) -> EncoderOutput {
        self.forward_ids(vec![tokens.iter().map(|&t| t as i64).collect()])
    }

    fn forward_ids(&self, ids: Vec<Vec<i64>>) -> EncoderOutput {
        let mut states = Vec::with_capacity(ids.len());
        let mut traces = Vec::with_capacity(ids.len());
        for row in &ids {
            let right = self.run(&self.rnn_right, row, false);
            let left = self.run(&self.rnn_left, row, true);
            states.push(
                right
                    .hidden
                    .iter()
                    .zip(&left.hidden)
                    .map(|(r, l)| concat(&[r, l]))
                    .collect(),
            );
            traces.push([right, left]);
        }
        EncoderOutput {
            states,
            ids,
            traces,
        }
    }

    fn run(&self, rnn: &Linear, ids: &[i64], reverse: bool) -> DirectionTrace {
        let len = ids.len();
        let mut inputs = vec![Vec::new(); len];
        let mut hidden = vec![Vec::new(); len];
        let mut carry = vec![0.0; self.hidden_size()];
        for pos in positions(len, reverse) {
            let x = concat(&[self.embedding.lookup(ids[pos]), &carry]);
            let mut h = rnn.forward(&x);
            elu_inplace(&mut h);
            carry.clone_from(&h);
            inputs[pos] = x;
            hidden[pos] = h;
        }
        DirectionTrace { inputs, hidden }
    }

    /// Backpropagate `d_states` (same shape as `out.states`) through time.
    pub fn backward(&self, out: &EncoderOutput, d_states: &[Vec<Vec<f32>>]) -> Encoder {
        let mut grad = self.zeros_like();
        let hidden = self.hidden_size();
        let Encoder {
            embedding: g_emb,
            rnn_right: g_right,
            rnn_left: g_left,
        } = &mut grad;
        for ((ids, [right, left]), d_rows) in out.ids.iter().zip(&out.traces).zip(d_states) {
            let d_right: Vec<&[f32]> = d_rows.iter().map(|d| &d[..hidden]).collect();
            let d_left: Vec<&[f32]> = d_rows.iter().map(|d| &d[hidden..]).collect();
            self.backprop_direction(&self.rnn_right, right, ids, false, &d_right, g_right, g_emb);
            self.backprop_direction(&self.rnn_left, left, ids, true, &d_left, g_left, g_emb);
        }
        grad
    }

    #[allow(clippy::too_many_arguments)]
    fn backprop_direction(
        &self,
        rnn: &Linear,
        trace: &DirectionTrace,
        ids: &[i64],
        reverse: bool,
        d_hidden: &[&[f32]],
        g_rnn: &mut Linear,
        g_emb: &mut Embedding,
    ) {
        let emb = self.embedding.dim();
        let mut carry = vec![0.0; self.hidden_size()];
        // Walk the forward order backwards.
        for pos in positions(ids.len(), !reverse) {
            let mut dh = d_hidden[pos].to_vec();
            add_assign(&mut dh, &carry);
            let dz = elu_backward(&trace.hidden[pos], &dh);
            let dx = rnn.backward(&trace.inputs[pos], &dz, g_rnn);
            self.embedding.backward(ids[pos], &dx[..emb], g_emb);
            carry = dx[emb..].to_vec();
        }
    }

    pub fn params(&self) -> Vec<&[f32]> {
        let mut out = vec![&self.embedding.table.data[..]];
        out.extend(self.rnn_right.params());
        out.extend(self.rnn_left.params());
        out
    }

    pub fn params_mut(&mut self) -> Vec<&mut [f32]> {
        let mut out = vec![&mut self.embedding.table.data[..]];
        out.extend(self.rnn_right.params_mut());
        out.extend(self.rnn_left.params_mut());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn output_shape_and_direction_split() {
        let mut rng = StdRng::seed_from_u64(11);
        let enc = Encoder::new(6, 4, 3, &mut rng);
        let src = TokenMatrix::from_sequences(&[vec![1, 2, 5], vec![3]]).unwrap();
        let out = enc.forward(&src);
        assert_eq!(out.batch_size(), 2);
        assert_eq!(out.source_len(), 3);
        assert!(out.states.iter().flatten().all(|s| s.len() == 6));

        // A row without padding encodes exactly like the sequence on its own.
        let alone = enc.encode_tokens(&[1, 2, 5]);
        assert_eq!(alone.states[0], out.states[0]);
    }

    #[test]
    fn sentinel_is_wrapped_not_rejected() {
        let mut rng = StdRng::seed_from_u64(2);
        let enc = Encoder::new(4, 2, 2, &mut rng);
        let wrapped = enc.forward(&TokenMatrix::padding(1, 2));
        let explicit = enc.forward(&TokenMatrix::from_sequences(&[vec![3, 3]]).unwrap());
        // -1 behaves exactly like the last vocabulary id.
        assert_eq!(wrapped.states, explicit.states);
    }

    #[test]
    fn forward_half_only_sees_prefix() {
        let mut rng = StdRng::seed_from_u64(2);
        let enc = Encoder::new(4, 2, 2, &mut rng);
        let short = enc.encode_tokens(&[1]);
        let long = enc.encode_tokens(&[1, 3]);
        assert_eq!(long.states[0][0][..2], short.states[0][0][..2]);
        assert_ne!(long.states[0][0][2..], short.states[0][0][2..]);
    }

    #[test]
    fn backward_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut enc = Encoder::new(5, 3, 2, &mut rng);
        let src = TokenMatrix::from_sequences(&[vec![0, 4, 2, 1]]).unwrap();
        // Loss = sum of all outputs.
        let loss = |e: &Encoder| -> f32 {
            e.forward(&src).states.iter().flatten().flatten().sum()
        };
        let out = enc.forward(&src);
        let ones: Vec<Vec<Vec<f32>>> = out
            .states
            .iter()
            .map(|r| r.iter().map(|s| vec![1.0; s.len()]).collect())
            .collect();
        let grad = enc.backward(&out, &ones);
        let analytic = grad.rnn_left.weight.data[1];
        let eps = 1e-3;
        enc.rnn_left.weight.data[1] += eps;
        let up = loss(&enc);
        enc.rnn_left.weight.data[1] -= 2.0 * eps;
        let down = loss(&enc);
        let numeric = (up - down) / (2.0 * eps);
        assert!(
            (numeric - analytic).abs() < 1e-2 * (1.0 + analytic.abs()),
            "{numeric} vs {analytic}"
        );
    }
}
