//! Teacher-forced training with backpropagation through time.

use indicatif::ProgressBar;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::batch::{build_batch, Batch, TokenMatrix};
use crate::config::TrainConfig;
use crate::corpus::{PairSource, Variant};
use crate::decoder::{DecodeOptions, DecodeTarget};
use crate::error::Result;
use crate::model::Model;
use crate::optim::{clip_scale, global_norm, Adam};
use crate::tensor::softmax;
use crate::{Token, PAD};

/// Optimizer state for the encoder plus one decoder, per variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimizers {
    pub secondary: Adam,
    pub auxiliary: Adam,
}

impl Optimizers {
    pub fn new(lr: f32) -> Self {
        Self {
            secondary: Adam::new(lr),
            auxiliary: Adam::new(lr),
        }
    }

    pub fn get_mut(&mut self, variant: Variant) -> &mut Adam {
        match variant {
            Variant::Secondary => &mut self.secondary,
            Variant::Auxiliary => &mut self.auxiliary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub loss: f32,
    /// Arg-max accuracy over non-padding target positions.
    pub accuracy: f32,
    pub source_len: usize,
    pub target_len: usize,
}

/// Mean loss and accuracy per variant over one epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub secondary_loss: Option<f32>,
    pub secondary_accuracy: Option<f32>,
    pub auxiliary_loss: Option<f32>,
    pub auxiliary_accuracy: Option<f32>,
}

/// Mean cross-entropy of `softmax(outputs)` against `target mod vocab`, and its
/// gradient with respect to `outputs`.
pub fn cross_entropy(
    outputs: &[Vec<Vec<f32>>],
    target: &TokenMatrix,
    vocab: usize,
) -> (f32, Vec<Vec<Vec<f32>>>) {
    let count = outputs.iter().map(Vec::len).sum::<usize>().max(1) as f32;
    let mut loss = 0.0f32;
    let mut grads = Vec::with_capacity(outputs.len());
    for (b, row) in outputs.iter().enumerate() {
        let mut row_grads = Vec::with_capacity(row.len());
        for (i, out) in row.iter().enumerate() {
            let label = (target.get(b, i) as i64).rem_euclid(vocab as i64) as usize;
            let mut probs = softmax(out);
            loss -= probs[label].max(f32::MIN_POSITIVE).ln();
            probs[label] -= 1.0;
            for p in probs.iter_mut() {
                *p /= count;
            }
            row_grads.push(probs);
        }
        grads.push(row_grads);
    }
    (loss / count, grads)
}

/// Fraction of non-padding target positions whose arg-max matches.
pub fn accuracy(hard: &[Vec<Token>], target: &TokenMatrix) -> f32 {
    let mut hits = 0usize;
    let mut total = 0usize;
    for (b, row) in hard.iter().enumerate() {
        for (i, &tok) in row.iter().enumerate() {
            let want = target.get(b, i);
            if want == PAD {
                continue;
            }
            total += 1;
            if want == tok as i32 {
                hits += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f32 / total as f32
    }
}

pub struct Trainer {
    pub model: Model,
    pub optimizers: Optimizers,
    pub settings: TrainConfig,
}

impl Trainer {
    pub fn new(model: Model, settings: TrainConfig) -> Self {
        let optimizers = Optimizers::new(settings.learning_rate);
        Self::resume(model, optimizers, settings)
    }

    pub fn resume(model: Model, optimizers: Optimizers, settings: TrainConfig) -> Self {
        Self {
            model,
            optimizers,
            settings,
        }
    }

    /// One optimization step of the encoder and `variant`'s decoder on `batch`.
    pub fn step_on_batch<R: Rng + ?Sized>(
        &mut self,
        variant: Variant,
        batch: &Batch,
        rng: &mut R,
    ) -> Result<StepMetrics> {
        let opts = DecodeOptions {
            teacher_forcing_prob: self.settings.teacher_forcing_prob,
            confidence_boost: 1.0,
        };
        let (encoder, decoder) = self.model.parts_mut(variant);
        let encoded = encoder.forward(&batch.source);
        let decoded = decoder.forward(
            &encoded.states,
            DecodeTarget::Forced(&batch.target),
            opts,
            rng,
        )?;

        let (loss, d_outputs) = cross_entropy(&decoded.outputs, &batch.target, decoder.vocab());
        let acc = accuracy(&decoded.hard, &batch.target);

        let (dec_grad, d_states) = decoder.backward(&encoded.states, &decoded, &d_outputs);
        let enc_grad = encoder.backward(&encoded, &d_states);

        let mut grads = enc_grad.params();
        grads.extend(dec_grad.params());
        let scale = clip_scale(global_norm(&grads), self.settings.clip_norm);

        let mut params = encoder.params_mut();
        params.extend(decoder.params_mut());
        self.optimizers.get_mut(variant).step(params, &grads, scale)?;

        Ok(StepMetrics {
            loss,
            accuracy: acc,
            source_len: batch.source.cols(),
            target_len: batch.target.cols(),
        })
    }

    /// Sample a fresh batch for `variant` and train on it.
    pub fn train_step<S: PairSource + ?Sized, R: Rng>(
        &mut self,
        source: &S,
        variant: Variant,
        rng: &mut R,
    ) -> Result<StepMetrics> {
        let batch = build_batch(
            source,
            self.settings.batch_size,
            variant,
            None,
            self.settings.max_sampling_attempts,
            rng,
        )?;
        self.step_on_batch(variant, &batch, rng)
    }

    /// Run `rounds_per_epoch` passes over the variant schedule.
    pub fn train_epoch<S: PairSource + ?Sized, R: Rng>(
        &mut self,
        source: &S,
        epoch: usize,
        rng: &mut R,
        progress: Option<&ProgressBar>,
    ) -> Result<EpochSummary> {
        let schedule = self.settings.schedule.clone();
        let mut totals = [(0.0f32, 0.0f32, 0usize); 2];
        for round in 0..self.settings.rounds_per_epoch {
            for &variant in &schedule {
                let m = self.train_step(source, variant, rng)?;
                tracing::debug!(
                    epoch,
                    round,
                    %variant,
                    loss = m.loss,
                    accuracy = m.accuracy,
                    src_len = m.source_len,
                    tgt_len = m.target_len,
                    "train step"
                );
                let slot = &mut totals[variant_slot(variant)];
                slot.0 += m.loss;
                slot.1 += m.accuracy;
                slot.2 += 1;
                if let Some(pb) = progress {
                    pb.set_message(format!("{variant} L={:.3} a={:5.1}%", m.loss, m.accuracy * 100.0));
                    pb.inc(1);
                }
            }
        }
        let mean = |(sum, _, n): (f32, f32, usize)| (n > 0).then(|| sum / n as f32);
        let mean_acc = |(_, sum, n): (f32, f32, usize)| (n > 0).then(|| sum / n as f32);
        Ok(EpochSummary {
            epoch,
            secondary_loss: mean(totals[0]),
            secondary_accuracy: mean_acc(totals[0]),
            auxiliary_loss: mean(totals[1]),
            auxiliary_accuracy: mean_acc(totals[1]),
        })
    }

    /// Greedy decodes of a few fresh pairs: `(source, reference, hypothesis)`.
    pub fn sample_translations<S: PairSource + ?Sized, R: Rng>(
        &self,
        source: &S,
        variant: Variant,
        rng: &mut R,
    ) -> Result<Vec<(Vec<Token>, Vec<Token>, Vec<Token>)>> {
        let batch = build_batch(
            source,
            self.settings.sample_count,
            variant,
            Some(self.settings.sample_max_length),
            self.settings.max_sampling_attempts,
            rng,
        )?;
        let encoded = self.model.encoder.forward(&batch.source);
        let decoded = self.model.decoder(variant).forward(
            &encoded.states,
            DecodeTarget::Forced(&batch.target),
            DecodeOptions::greedy(1.0),
            rng,
        )?;
        Ok((0..batch.source.rows())
            .map(|r| {
                (
                    batch.source.content(r),
                    batch.target.content(r),
                    decoded.hard[r].clone(),
                )
            })
            .collect())
    }
}

fn variant_slot(variant: Variant) -> usize {
    match variant {
        Variant::Secondary => 0,
        Variant::Auxiliary => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_entropy_of_confident_prediction_is_small() {
        let target = TokenMatrix::from_sequences(&[vec![1]]).unwrap();
        let outputs = vec![vec![vec![-10.0, 10.0, -10.0]]];
        let (loss, grads) = cross_entropy(&outputs, &target, 3);
        assert!(loss < 1e-3);
        assert!(grads[0][0][1] <= 0.0);
        assert!((grads[0][0].iter().sum::<f32>()).abs() < 1e-5);
    }

    #[test]
    fn padding_trains_terminator() {
        let target = TokenMatrix::padding(1, 1);
        let outputs = vec![vec![vec![0.0, 0.0, 0.0]]];
        let (_, grads) = cross_entropy(&outputs, &target, 3);
        assert!(grads[0][0][2] < 0.0);
        assert!(grads[0][0][0] > 0.0);
    }

    #[test]
    fn accuracy_ignores_padding() {
        let target = TokenMatrix::from_sequences(&[vec![1, 2], vec![3]]).unwrap();
        let hard = vec![vec![1, 0], vec![3, 3]];
        assert!((accuracy(&hard, &target) - 2.0 / 3.0).abs() < 1e-6);
    }
}
