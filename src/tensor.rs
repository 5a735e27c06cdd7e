//! Dense `f32` building blocks with hand-written gradients.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Uniform init in `[-bound, bound]`.
    pub fn uniform<R: Rng + ?Sized>(rows: usize, cols: usize, bound: f32, rng: &mut R) -> Self {
        let data = (0..rows * cols)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        Self { rows, cols, data }
    }

    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// `y = self * x`
    pub fn matvec(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.cols);
        (0..self.rows).map(|r| dot(self.row(r), x)).collect()
    }

    /// `y = self^T * x`
    pub fn matvec_t(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.rows);
        let mut out = vec![0.0; self.cols];
        for (r, &xr) in x.iter().enumerate() {
            if xr == 0.0 {
                continue;
            }
            for (o, &w) in out.iter_mut().zip(self.row(r)) {
                *o += w * xr;
            }
        }
        out
    }

    /// `self += a * b^T`
    pub fn add_outer(&mut self, a: &[f32], b: &[f32]) {
        for (r, &ar) in a.iter().enumerate() {
            if ar == 0.0 {
                continue;
            }
            for (w, &bc) in self.row_mut(r).iter_mut().zip(b) {
                *w += ar * bc;
            }
        }
    }
}

/// Fully connected layer `y = W x + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub weight: Matrix,
    pub bias: Vec<f32>,
}

impl Linear {
    /// Uniform init with bound `1/sqrt(fan_in)`.
    pub fn new<R: Rng + ?Sized>(input: usize, output: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (input.max(1) as f32).sqrt();
        Self {
            weight: Matrix::uniform(output, input, bound, rng),
            bias: (0..output).map(|_| rng.gen_range(-bound..=bound)).collect(),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            weight: Matrix::zeros(self.weight.rows, self.weight.cols),
            bias: vec![0.0; self.bias.len()],
        }
    }

    pub fn input_size(&self) -> usize {
        self.weight.cols
    }

    pub fn output_size(&self) -> usize {
        self.weight.rows
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let mut y = self.weight.matvec(x);
        for (v, b) in y.iter_mut().zip(&self.bias) {
            *v += b;
        }
        y
    }

    /// Accumulate gradients for `dy` at input `x` into `grad`; returns `dx`.
    pub fn backward(&self, x: &[f32], dy: &[f32], grad: &mut Linear) -> Vec<f32> {
        grad.weight.add_outer(dy, x);
        for (g, d) in grad.bias.iter_mut().zip(dy) {
            *g += d;
        }
        self.weight.matvec_t(dy)
    }

    pub fn params(&self) -> Vec<&[f32]> {
        vec![&self.weight.data[..], &self.bias[..]]
    }

    pub fn params_mut(&mut self) -> Vec<&mut [f32]> {
        vec![&mut self.weight.data[..], &mut self.bias[..]]
    }
}

/// Token embedding table; ids are reduced modulo the vocabulary size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub table: Matrix,
}

impl Embedding {
    pub fn new<R: Rng + ?Sized>(vocab: usize, dim: usize, rng: &mut R) -> Self {
        Self {
            table: Matrix::uniform(vocab, dim, 1.0, rng),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            table: Matrix::zeros(self.table.rows, self.table.cols),
        }
    }

    pub fn vocab(&self) -> usize {
        self.table.rows
    }

    pub fn dim(&self) -> usize {
        self.table.cols
    }

    /// Row index for a possibly out-of-range id such as the padding sentinel.
    pub fn index(&self, id: i64) -> usize {
        id.rem_euclid(self.vocab() as i64) as usize
    }

    pub fn lookup(&self, id: i64) -> &[f32] {
        self.table.row(self.index(id))
    }

    pub fn backward(&self, id: i64, dy: &[f32], grad: &mut Embedding) {
        let row = grad.table.row_mut(self.index(id));
        for (g, d) in row.iter_mut().zip(dy) {
            *g += d;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn concat(parts: &[&[f32]]) -> Vec<f32> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

pub fn elu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        x.exp_m1()
    }
}

/// ELU derivative expressed through its output `y = elu(x)`.
pub fn elu_grad_from_output(y: f32) -> f32 {
    if y > 0.0 {
        1.0
    } else {
        y + 1.0
    }
}

pub fn elu_inplace(v: &mut [f32]) {
    for x in v.iter_mut() {
        *x = elu(*x);
    }
}

/// Multiply `dy` by the ELU derivative at outputs `y`.
pub fn elu_backward(y: &[f32], dy: &[f32]) -> Vec<f32> {
    y.iter()
        .zip(dy)
        .map(|(&y, &d)| d * elu_grad_from_output(y))
        .collect()
}

/// Numerically stable softmax.
pub fn softmax(v: &[f32]) -> Vec<f32> {
    let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![1.0 / v.len().max(1) as f32; v.len()];
    }
    let mut out: Vec<f32> = v.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = out.iter().sum();
    for x in out.iter_mut() {
        *x /= sum;
    }
    out
}

/// Index of the largest element; the first one wins ties.
pub fn argmax(v: &[f32]) -> usize {
    let mut best = 0;
    for (i, &x) in v.iter().enumerate() {
        if x > v[best] {
            best = i;
        }
    }
    best
}

/// `dst += src`
pub fn add_assign(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}
