//! Adam over flat parameter slices.
//!
//! m = b1*m + (1-b1)*g
//! v = b2*v + (1-b2)*g^2
//! p = p - lr * m_hat / (sqrt(v_hat) + eps)

use serde::{Deserialize, Serialize};

use crate::error::{AnteError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    step: u64,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn steps_taken(&self) -> u64 {
        self.step
    }

    /// Apply one update. `grads[i]` is scaled by `scale` before use and must
    /// match `params[i]` in length; the layout must not change between calls.
    pub fn step(&mut self, params: Vec<&mut [f32]>, grads: &[&[f32]], scale: f32) -> Result<()> {
        if params.len() != grads.len() {
            return Err(AnteError::Shape(format!(
                "{} parameter tensors but {} gradients",
                params.len(),
                grads.len()
            )));
        }
        if self.m.is_empty() {
            self.m = grads.iter().map(|g| vec![0.0; g.len()]).collect();
            self.v = self.m.clone();
        }
        if self.m.len() != params.len() {
            return Err(AnteError::Shape("optimizer state does not match parameters".into()));
        }

        self.step += 1;
        let t = self.step as i32;
        let c1 = 1.0 - self.beta1.powi(t);
        let c2 = 1.0 - self.beta2.powi(t);
        for (((p, g), m), v) in params.into_iter().zip(grads).zip(&mut self.m).zip(&mut self.v) {
            if p.len() != g.len() || m.len() != g.len() {
                return Err(AnteError::Shape("gradient length mismatch".into()));
            }
            for i in 0..p.len() {
                let g = g[i] * scale;
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                p[i] -= self.lr * (m[i] / c1) / ((v[i] / c2).sqrt() + self.eps);
            }
        }
        Ok(())
    }
}

pub fn global_norm(grads: &[&[f32]]) -> f32 {
    grads
        .iter()
        .flat_map(|g| g.iter())
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt()
}

/// Factor that rescales gradients to at most `max_norm` (no clipping when
/// `max_norm <= 0`).
pub fn clip_scale(norm: f32, max_norm: f32) -> f32 {
    if max_norm > 0.0 && norm > max_norm {
        max_norm / norm
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimizes_quadratic() {
        let mut x = vec![3.0f32, -2.0];
        let mut opt = Adam::new(0.1);
        for _ in 0..500 {
            let g: Vec<f32> = x.iter().map(|v| 2.0 * v).collect();
            opt.step(vec![&mut x[..]], &[&g[..]], 1.0).unwrap();
        }
        assert!(x.iter().all(|v| v.abs() < 0.1), "{x:?}");
        assert_eq!(opt.steps_taken(), 500);
    }

    #[test]
    fn clipping() {
        assert_eq!(clip_scale(10.0, 5.0), 0.5);
        assert_eq!(clip_scale(1.0, 5.0), 1.0);
        assert_eq!(clip_scale(10.0, 0.0), 1.0);
        assert!((global_norm(&[&[3.0f32][..], &[4.0][..]]) - 5.0).abs() < 1e-6);
    }
}
