//! Attention decoder.
//!
//! Every output step rescores all encoder positions against the current
//! decoder state, forms a context vector, advances the recurrent state and
//! emits one unnormalized score per target symbol. The token fed into the next
//! step is either the ground truth (teacher forcing) or the arg-max of the
//! current emission, decided by one draw per step for the whole batch.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::batch::TokenMatrix;
use crate::error::{AnteError, Result};
use crate::tensor::{
    add_assign, argmax, concat, dot, elu, elu_backward, elu_grad_from_output, elu_inplace,
    softmax, Embedding, Linear,
};
use crate::Token;

/// Token id fed into the first decoding step.
pub const START_TOKEN: i64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoder {
    pub energizer_l1: Linear,
    pub energizer_l2: Linear,
    pub embedding: Embedding,
    pub rnn: Linear,
    pub out: Linear,
}

/// Per-call decoding knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    /// Probability of feeding the ground-truth token at each step.
    pub teacher_forcing_prob: f64,
    /// Factor applied to attention energies before normalization.
    pub confidence_boost: f32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            teacher_forcing_prob: 0.5,
            confidence_boost: 1.0,
        }
    }
}

impl DecodeOptions {
    /// Greedy decoding with no teacher forcing.
    pub fn greedy(confidence_boost: f32) -> Self {
        Self {
            teacher_forcing_prob: 0.0,
            confidence_boost,
        }
    }
}

/// What drives the number of steps.
#[derive(Debug, Clone, Copy)]
pub enum DecodeTarget<'a> {
    /// Ground-truth batch; its width sets the step count.
    Forced(&'a TokenMatrix),
    /// Free running for a fixed number of steps.
    Steps(usize),
}

#[derive(Debug, Clone)]
struct StepTrace {
    prev: i64,
    h_prev: Vec<f32>,
    scorer_hidden: Vec<Vec<f32>>,
    energies: Vec<f32>,
    context: Vec<f32>,
    hidden: Vec<f32>,
}

/// Decoder result for a batch.
#[derive(Debug, Clone)]
pub struct DecoderOutput {
    /// `[batch][step][vocab]` raw emissions.
    pub outputs: Vec<Vec<Vec<f32>>>,
    /// `[batch][step][source_pos]` attention weights.
    pub attention: Vec<Vec<Vec<f32>>>,
    /// `[batch][step]` arg-max tokens.
    pub hard: Vec<Vec<Token>>,
    boost: f32,
    traces: Vec<Vec<StepTrace>>,
}

impl DecoderOutput {
    pub fn steps(&self) -> usize {
        self.hard.first().map_or(0, Vec::len)
    }
}

/// One draw per step; certain probabilities consume no randomness.
fn teacher_forces<R: Rng + ?Sized>(prob: f64, rng: &mut R) -> bool {
    if prob >= 1.0 {
        true
    } else if prob <= 0.0 {
        false
    } else {
        rng.gen::<f64>() < prob
    }
}

impl Decoder {
    pub fn new<R: Rng + ?Sized>(
        vocab: usize,
        emb_size: usize,
        enc_size: usize,
        hidden: usize,
        attn_hidden: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            energizer_l1: Linear::new(enc_size + hidden, attn_hidden, rng),
            energizer_l2: Linear::new(attn_hidden, 1, rng),
            embedding: Embedding::new(vocab, emb_size, rng),
            rnn: Linear::new(emb_size + hidden + enc_size, hidden, rng),
            out: Linear::new(emb_size + hidden + enc_size, vocab, rng),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            energizer_l1: self.energizer_l1.zeros_like(),
            energizer_l2: self.energizer_l2.zeros_like(),
            embedding: self.embedding.zeros_like(),
            rnn: self.rnn.zeros_like(),
            out: self.out.zeros_like(),
        }
    }

    pub fn vocab(&self) -> usize {
        self.out.output_size()
    }

    pub fn hidden_size(&self) -> usize {
        self.rnn.output_size()
    }

    /// Width of the encoder states this decoder attends over.
    pub fn enc_size(&self) -> usize {
        self.energizer_l1.input_size() - self.hidden_size()
    }

    fn score(&self, enc_row: &[Vec<f32>], hidden: &[f32]) -> (Vec<Vec<f32>>, Vec<f32>) {
        let mut scorer_hidden = Vec::with_capacity(enc_row.len());
        let mut energies = Vec::with_capacity(enc_row.len());
        for e in enc_row {
            let mut a = self.energizer_l1.forward(&concat(&[e, hidden]));
            elu_inplace(&mut a);
            energies.push(elu(self.energizer_l2.forward(&a)[0]));
            scorer_hidden.push(a);
        }
        (scorer_hidden, energies)
    }

    fn normalize(energies: &[f32], boost: f32) -> Vec<f32> {
        let scaled: Vec<f32> = energies.iter().map(|e| e * boost).collect();
        let weights = softmax(&scaled);
        debug_assert!(
            (weights.iter().sum::<f32>() - 1.0).abs() < 1e-3 && weights.iter().all(|&w| w >= 0.0),
            "attention weights not normalized: {weights:?}"
        );
        weights
    }

    /// Attention distribution over `enc_row` for decoder state `hidden`.
    pub fn attention_weights(&self, enc_row: &[Vec<f32>], hidden: &[f32], boost: f32) -> Vec<f32> {
        let (_, energies) = self.score(enc_row, hidden);
        Self::normalize(&energies, boost)
    }

    /// Decode with teacher forcing drawn from `rng` once per step.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        enc_states: &[Vec<Vec<f32>>],
        target: DecodeTarget<'_>,
        opts: DecodeOptions,
        rng: &mut R,
    ) -> Result<DecoderOutput> {
        self.run(enc_states, target, opts.confidence_boost, || {
            teacher_forces(opts.teacher_forcing_prob, rng)
        })
    }

    /// Free-running greedy decode for `steps` steps.
    pub fn generate(
        &self,
        enc_states: &[Vec<Vec<f32>>],
        steps: usize,
        confidence_boost: f32,
    ) -> Result<DecoderOutput> {
        self.run(enc_states, DecodeTarget::Steps(steps), confidence_boost, || false)
    }

    fn run<F: FnMut() -> bool>(
        &self,
        enc_states: &[Vec<Vec<f32>>],
        target: DecodeTarget<'_>,
        boost: f32,
        mut force_step: F,
    ) -> Result<DecoderOutput> {
        let batch = enc_states.len();
        let steps = match target {
            DecodeTarget::Forced(t) => {
                if t.rows() != batch {
                    return Err(AnteError::Shape(format!(
                        "target has {} rows for a batch of {batch}",
                        t.rows()
                    )));
                }
                t.cols()
            }
            DecodeTarget::Steps(n) => n,
        };
        for row in enc_states {
            if row.is_empty() {
                return Err(AnteError::Shape("empty source sequence".into()));
            }
            if let Some(bad) = row.iter().find(|s| s.len() != self.enc_size()) {
                return Err(AnteError::Shape(format!(
                    "encoder state width {} but decoder expects {}",
                    bad.len(),
                    self.enc_size()
                )));
            }
        }

        let hidden = self.hidden_size();
        let mut prev = vec![START_TOKEN; batch];
        let mut states = vec![vec![0.0f32; hidden]; batch];
        let mut outputs = vec![Vec::with_capacity(steps); batch];
        let mut attention = vec![Vec::with_capacity(steps); batch];
        let mut hard = vec![Vec::with_capacity(steps); batch];
        let mut traces = vec![Vec::with_capacity(steps); batch];

        for i in 0..steps {
            let force = match target {
                DecodeTarget::Forced(_) => force_step(),
                DecodeTarget::Steps(_) => false,
            };
            for b in 0..batch {
                let enc_row = &enc_states[b];
                let (scorer_hidden, energies) = self.score(enc_row, &states[b]);
                let weights = Self::normalize(&energies, boost);

                let mut context = vec![0.0f32; self.enc_size()];
                for (w, e) in weights.iter().zip(enc_row) {
                    for (c, &v) in context.iter_mut().zip(e) {
                        *c += w * v;
                    }
                }

                let p = self.embedding.lookup(prev[b]);
                let mut h = self.rnn.forward(&concat(&[p, &states[b], &context]));
                elu_inplace(&mut h);
                let mut out = self.out.forward(&concat(&[p, &h, &context]));
                elu_inplace(&mut out);

                let choice = argmax(&out);
                hard[b].push(choice as Token);
                traces[b].push(StepTrace {
                    prev: prev[b],
                    h_prev: std::mem::replace(&mut states[b], h.clone()),
                    scorer_hidden,
                    energies,
                    context,
                    hidden: h,
                });
                prev[b] = match target {
                    DecodeTarget::Forced(t) if force => t.get(b, i) as i64,
                    _ => choice as i64,
                };
                outputs[b].push(out);
                attention[b].push(weights);
            }
        }

        Ok(DecoderOutput {
            outputs,
            attention,
            hard,
            boost,
            traces,
        })
    }

    /// Backpropagate `d_outputs` (same shape as `out.outputs`). Returns the
    /// parameter gradients and the gradient for every encoder state.
    pub fn backward(
        &self,
        enc_states: &[Vec<Vec<f32>>],
        out: &DecoderOutput,
        d_outputs: &[Vec<Vec<f32>>],
    ) -> (Decoder, Vec<Vec<Vec<f32>>>) {
        let mut grad = self.zeros_like();
        let emb = self.embedding.dim();
        let hidden = self.hidden_size();
        let mut d_enc: Vec<Vec<Vec<f32>>> = enc_states
            .iter()
            .map(|row| row.iter().map(|s| vec![0.0; s.len()]).collect())
            .collect();

        for b in 0..enc_states.len() {
            let enc_row = &enc_states[b];
            let mut carry = vec![0.0f32; hidden];
            for i in (0..out.traces[b].len()).rev() {
                let tr = &out.traces[b][i];
                let p = self.embedding.lookup(tr.prev);

                let dz_out = elu_backward(&out.outputs[b][i], &d_outputs[b][i]);
                let out_in = concat(&[p, &tr.hidden, &tr.context]);
                let d_out_in = self.out.backward(&out_in, &dz_out, &mut grad.out);
                let mut d_emb = d_out_in[..emb].to_vec();
                let mut dh = d_out_in[emb..emb + hidden].to_vec();
                add_assign(&mut dh, &carry);
                let mut d_ctx = d_out_in[emb + hidden..].to_vec();

                let dz_rnn = elu_backward(&tr.hidden, &dh);
                let rnn_in = concat(&[p, &tr.h_prev, &tr.context]);
                let d_rnn_in = self.rnn.backward(&rnn_in, &dz_rnn, &mut grad.rnn);
                add_assign(&mut d_emb, &d_rnn_in[..emb]);
                let mut dh_prev = d_rnn_in[emb..emb + hidden].to_vec();
                add_assign(&mut d_ctx, &d_rnn_in[emb + hidden..]);
                self.embedding.backward(tr.prev, &d_emb, &mut grad.embedding);

                // Context is a weighted sum of encoder states.
                let weights = &out.attention[b][i];
                let dw: Vec<f32> = enc_row.iter().map(|e| dot(&d_ctx, e)).collect();
                for (d, &w) in d_enc[b].iter_mut().zip(weights) {
                    for (dv, &c) in d.iter_mut().zip(&d_ctx) {
                        *dv += w * c;
                    }
                }

                // Softmax, then the boost factor, then the two-layer scorer.
                let mean = dot(weights, &dw);
                for j in 0..enc_row.len() {
                    let d_energy = weights[j] * (dw[j] - mean) * out.boost;
                    let ds = d_energy * elu_grad_from_output(tr.energies[j]);
                    let a = &tr.scorer_hidden[j];
                    let da = self.energizer_l2.backward(a, &[ds], &mut grad.energizer_l2);
                    let dz1 = elu_backward(a, &da);
                    let u = concat(&[&enc_row[j], &tr.h_prev]);
                    let du = self.energizer_l1.backward(&u, &dz1, &mut grad.energizer_l1);
                    let d_state_width = enc_row[j].len();
                    add_assign(&mut d_enc[b][j], &du[..d_state_width]);
                    add_assign(&mut dh_prev, &du[d_state_width..]);
                }
                carry = dh_prev;
            }
        }
        (grad, d_enc)
    }

    pub fn params(&self) -> Vec<&[f32]> {
        let mut out = Vec::new();
        out.extend(self.energizer_l1.params());
        out.extend(self.energizer_l2.params());
        out.push(&self.embedding.table.data[..]);
        out.extend(self.rnn.params());
        out.extend(self.out.params());
        out
    }

    pub fn params_mut(&mut self) -> Vec<&mut [f32]> {
        let mut out = Vec::new();
        out.extend(self.energizer_l1.params_mut());
        out.extend(self.energizer_l2.params_mut());
        out.push(&mut self.embedding.table.data[..]);
        out.extend(self.rnn.params_mut());
        out.extend(self.out.params_mut());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model(seed: u64) -> (Encoder, Decoder) {
        let mut rng = StdRng::seed_from_u64(seed);
        let enc = Encoder::new(7, 4, 3, &mut rng);
        let dec = Decoder::new(6, 4, enc.output_size(), 5, 4, &mut rng);
        (enc, dec)
    }

    #[test]
    fn output_shapes() {
        let (enc, dec) = model(1);
        let src = TokenMatrix::from_sequences(&[vec![1, 2, 3, 6], vec![4, 5]]).unwrap();
        let tgt = TokenMatrix::from_sequences(&[vec![1, 5], vec![2, 3, 5]]).unwrap();
        let states = enc.forward(&src).states;
        let mut rng = StdRng::seed_from_u64(0);
        let out = dec
            .forward(&states, DecodeTarget::Forced(&tgt), DecodeOptions::default(), &mut rng)
            .unwrap();
        assert_eq!(out.outputs.len(), 2);
        assert_eq!(out.steps(), 3);
        assert!(out.outputs.iter().flatten().all(|o| o.len() == 6));
        assert!(out.attention.iter().flatten().all(|a| a.len() == 4));
    }

    #[test]
    fn mismatched_target_rows_rejected() {
        let (enc, dec) = model(1);
        let states = enc.forward(&TokenMatrix::from_sequences(&[vec![1]]).unwrap()).states;
        let tgt = TokenMatrix::padding(2, 3);
        let mut rng = StdRng::seed_from_u64(0);
        let res = dec.forward(&states, DecodeTarget::Forced(&tgt), DecodeOptions::default(), &mut rng);
        assert!(matches!(res, Err(AnteError::Shape(_))));
    }

    #[test]
    fn backward_matches_finite_difference() {
        let (enc, mut dec) = model(9);
        let states = enc
            .forward(&TokenMatrix::from_sequences(&[vec![1, 2, 3]]).unwrap())
            .states;
        let tgt = TokenMatrix::from_sequences(&[vec![4, 1, 5]]).unwrap();
        let opts = DecodeOptions {
            teacher_forcing_prob: 1.0,
            confidence_boost: 1.0,
        };
        let loss = |d: &Decoder| -> f32 {
            let mut rng = StdRng::seed_from_u64(0);
            let out = d
                .forward(&states, DecodeTarget::Forced(&tgt), opts, &mut rng)
                .unwrap();
            out.outputs.iter().flatten().flatten().sum()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let out = dec
            .forward(&states, DecodeTarget::Forced(&tgt), opts, &mut rng)
            .unwrap();
        let ones: Vec<Vec<Vec<f32>>> = out
            .outputs
            .iter()
            .map(|r| r.iter().map(|o| vec![1.0; o.len()]).collect())
            .collect();
        let (grad, _) = dec.backward(&states, &out, &ones);

        fn l1_weight(d: &mut Decoder) -> &mut f32 {
            &mut d.energizer_l1.weight.data[3]
        }
        fn l2_bias(d: &mut Decoder) -> &mut f32 {
            &mut d.energizer_l2.bias[0]
        }
        fn rnn_weight(d: &mut Decoder) -> &mut f32 {
            &mut d.rnn.weight.data[2]
        }
        let checks: [(&str, fn(&mut Decoder) -> &mut f32, f32); 3] = [
            ("l1", l1_weight, grad.energizer_l1.weight.data[3]),
            ("l2", l2_bias, grad.energizer_l2.bias[0]),
            ("rnn", rnn_weight, grad.rnn.weight.data[2]),
        ];
        for (name, param, analytic) in checks {
            let eps = 1e-3;
            *param(&mut dec) += eps;
            let up = loss(&dec);
            *param(&mut dec) -= 2.0 * eps;
            let down = loss(&dec);
            *param(&mut dec) += eps;
            let numeric = (up - down) / (2.0 * eps);
            assert!(
                (numeric - analytic).abs() < 2e-2 * (1.0 + analytic.abs()),
                "{name}: {numeric} vs {analytic}"
            );
        }
    }
}
