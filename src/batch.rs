//! Length-constrained pair sampling and sentinel-padded batches.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::corpus::{PairSource, SentencePair, Variant};
use crate::error::{AnteError, Result};
use crate::{Token, PAD};

/// Lower clamp and offset of the sampled maximum length.
pub const MIN_MAX_LENGTH: f64 = 3.0;
/// Upper clamp of the sampled maximum length.
pub const MAX_MAX_LENGTH: f64 = 15.0;
/// Mean of the exponential part of the sampled maximum length.
pub const LENGTH_MEAN: f64 = 10.0;
/// Default cap on rejection-sampling attempts per pair.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10_000;

/// Row-major `i32` matrix of token ids padded with [`PAD`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatrix {
    rows: usize,
    cols: usize,
    data: Vec<i32>,
}

impl TokenMatrix {
    /// Pad every sequence to the longest one. Ids must fit in `i32`.
    pub fn from_sequences(seqs: &[Vec<Token>]) -> Result<Self> {
        let cols = seqs.iter().map(Vec::len).max().unwrap_or(0);
        let mut data = Vec::with_capacity(seqs.len() * cols);
        for s in seqs {
            for &t in s {
                let id = i32::try_from(t)
                    .map_err(|_| AnteError::Shape(format!("token id {t} exceeds the matrix range")))?;
                data.push(id);
            }
            data.extend(std::iter::repeat(PAD).take(cols - s.len()));
        }
        Ok(Self {
            rows: seqs.len(),
            cols,
            data,
        })
    }

    /// Matrix of `rows x cols` filled with [`PAD`].
    pub fn padding(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![PAD; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, r: usize) -> &[i32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn get(&self, r: usize, c: usize) -> i32 {
        self.data[r * self.cols + c]
    }

    /// Row contents up to the first sentinel.
    pub fn content(&self, r: usize) -> Vec<Token> {
        self.row(r)
            .iter()
            .take_while(|&&t| t != PAD)
            .map(|&t| t as Token)
            .collect()
    }
}

/// Source and target sides of one training batch.
#[derive(Debug, Clone)]
pub struct Batch {
    pub source: TokenMatrix,
    pub target: TokenMatrix,
}

/// Accepted length window `(min, max)`, both exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthBudget {
    pub min: usize,
    pub max: f64,
}

impl LengthBudget {
    /// Budget for a caller supplied maximum.
    pub fn fixed(max: f64) -> Self {
        let min = (max * 0.9 - 2.0).max(0.0).floor() as usize;
        Self { min, max }
    }

    /// Exponentially distributed maximum shifted to 3 and capped at 15.
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Result<Self> {
        let exp = Exp::new(1.0 / LENGTH_MEAN)
            .map_err(|e| AnteError::Config(format!("length distribution: {e}")))?;
        let max = MIN_MAX_LENGTH + exp.sample(rng);
        Ok(Self::fixed(max.clamp(MIN_MAX_LENGTH, MAX_MAX_LENGTH)))
    }

    pub fn admits(&self, len: usize) -> bool {
        self.min < len && (len as f64) < self.max
    }
}

/// Draw pairs until either side fits `budget`, giving up after `max_attempts`.
pub fn sample_pair<S: PairSource + ?Sized, R: Rng>(
    source: &S,
    variant: Variant,
    budget: LengthBudget,
    max_attempts: usize,
    rng: &mut R,
) -> Result<SentencePair> {
    for attempt in 0..max_attempts {
        let pair = source.draw(variant, rng)?;
        if budget.admits(pair.target.len()) || budget.admits(pair.source.len()) {
            if attempt > 1000 {
                tracing::debug!(attempt, ?budget, "slow pair sampling");
            }
            return Ok(pair);
        }
    }
    Err(AnteError::SamplingExhausted {
        attempts: max_attempts,
    })
}

/// Sample `n` pairs of `variant` and pad them into a [`Batch`].
///
/// `max_length` fixes the upper length bound; otherwise it is drawn with
/// [`LengthBudget::sample`].
pub fn build_batch<S: PairSource + ?Sized, R: Rng>(
    source: &S,
    n: usize,
    variant: Variant,
    max_length: Option<f64>,
    max_attempts: usize,
    rng: &mut R,
) -> Result<Batch> {
    let budget = match max_length {
        Some(max) => LengthBudget::fixed(max),
        None => LengthBudget::sample(rng)?,
    };
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for _ in 0..n {
        let pair = sample_pair(source, variant, budget, max_attempts, rng)?;
        xs.push(pair.source);
        ys.push(pair.target);
    }
    Ok(Batch {
        source: TokenMatrix::from_sequences(&xs)?,
        target: TokenMatrix::from_sequences(&ys)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn budget_window() {
        let b = LengthBudget::fixed(10.0);
        assert_eq!(b.min, 7);
        assert!(!b.admits(7));
        assert!(b.admits(8));
        assert!(b.admits(9));
        assert!(!b.admits(10));
    }

    #[test]
    fn sampled_budget_is_clamped() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            let b = LengthBudget::sample(&mut rng).unwrap();
            assert!((MIN_MAX_LENGTH..=MAX_MAX_LENGTH).contains(&b.max));
            assert_eq!(b.min, (b.max * 0.9 - 2.0).max(0.0).floor() as usize);
        }
    }

    #[test]
    fn sampled_maximum_follows_shifted_exponential() {
        let mut rng = StdRng::seed_from_u64(21);
        let n = 20_000;
        let maxes: Vec<f64> = (0..n)
            .map(|_| LengthBudget::sample(&mut rng).unwrap().max)
            .collect();
        // E[min(3 + X, 15)] for X ~ Exp(mean 10)
        let expected_mean = MIN_MAX_LENGTH + LENGTH_MEAN * (1.0 - (-1.2f64).exp());
        let mean = maxes.iter().sum::<f64>() / n as f64;
        assert!((mean - expected_mean).abs() < 0.3, "mean {mean}");
        let capped = maxes.iter().filter(|&&m| m == MAX_MAX_LENGTH).count() as f64 / n as f64;
        assert!((capped - (-1.2f64).exp()).abs() < 0.02, "capped {capped}");
    }

    #[test]
    fn padding_uses_sentinel() {
        let m = TokenMatrix::from_sequences(&[vec![1, 2, 3], vec![4]]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert_eq!(m.row(1), &[4, PAD, PAD]);
        assert_eq!(m.content(0), vec![1, 2, 3]);
    }

    #[test]
    fn ids_past_i32_are_rejected() {
        let top = i32::MAX as Token;
        let m = TokenMatrix::from_sequences(&[vec![top]]).unwrap();
        assert_eq!(m.row(0), &[i32::MAX]);
        for id in [top + 1, Token::MAX] {
            let err = TokenMatrix::from_sequences(&[vec![0], vec![1, id]]).unwrap_err();
            assert!(matches!(err, AnteError::Shape(_)), "{err}");
        }
    }
}
