use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::DEFAULT_MAX_ATTEMPTS;
use crate::corpus::Variant;
use crate::error::{AnteError, Result};

/// Runtime configuration for training and translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub training: TrainConfig,
    pub paths: PathConfig,
    /// Seed for the shared random source. `None` seeds from the OS.
    pub seed: Option<u64>,
}

/// Layer widths shared by the encoder and every decoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub emb_size: usize,
    /// Hidden width of one encoder direction.
    pub enc_hidden: usize,
    pub dec_hidden: usize,
    /// Width of the attention scorer's hidden layer.
    pub attn_hidden: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub teacher_forcing_prob: f64,
    pub learning_rate: f32,
    /// Global gradient norm limit; `0` disables clipping.
    pub clip_norm: f32,
    /// Schedule repetitions per epoch.
    pub rounds_per_epoch: usize,
    /// Variants trained in order within one round.
    pub schedule: Vec<Variant>,
    pub max_sampling_attempts: usize,
    /// Greedy samples logged per variant after each epoch.
    pub sample_count: usize,
    pub sample_max_length: f64,
}

/// Locations of the pre-built data artifacts and checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub cache_dir: PathBuf,
    pub save_dir: PathBuf,
    /// Per-epoch metrics CSV. `None` disables it.
    pub metrics_csv: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            training: TrainConfig::default(),
            paths: PathConfig::default(),
            seed: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            emb_size: 20,
            enc_hidden: 20,
            dec_hidden: 80,
            attn_hidden: 20,
        }
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            teacher_forcing_prob: 0.5,
            learning_rate: 1e-3,
            clip_norm: 5.0,
            rounds_per_epoch: 16,
            schedule: vec![Variant::Secondary, Variant::Auxiliary, Variant::Auxiliary],
            max_sampling_attempts: DEFAULT_MAX_ATTEMPTS,
            sample_count: 4,
            sample_max_length: 10.0,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            save_dir: PathBuf::from("save"),
            metrics_csv: Some(PathBuf::from("save/metrics.csv")),
        }
    }
}

impl PathConfig {
    pub fn primary_grammar(&self) -> PathBuf {
        self.cache_dir.join("ngrams-prim.bin")
    }

    pub fn grammar(&self, variant: Variant) -> PathBuf {
        self.cache_dir.join(format!("ngrams-{variant}.bin"))
    }

    pub fn primary_sentences(&self) -> PathBuf {
        self.cache_dir.join("sentences-prim.bin")
    }

    pub fn sentences(&self, variant: Variant) -> PathBuf {
        self.cache_dir.join(format!("sentences-{variant}.bin"))
    }

    pub fn links(&self, variant: Variant) -> PathBuf {
        self.cache_dir.join(format!("{variant}-links.bin"))
    }
}

impl Config {
    /// Load a JSON config; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&text)
            .map_err(|e| AnteError::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.model;
        if m.emb_size == 0 || m.enc_hidden == 0 || m.dec_hidden == 0 || m.attn_hidden == 0 {
            return Err(AnteError::Config("model dimensions must be non-zero".into()));
        }
        let t = &self.training;
        if t.batch_size == 0 {
            return Err(AnteError::Config("batch_size must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&t.teacher_forcing_prob) {
            return Err(AnteError::Config(format!(
                "teacher_forcing_prob {} outside [0, 1]",
                t.teacher_forcing_prob
            )));
        }
        if !(t.learning_rate > 0.0) {
            return Err(AnteError::Config("learning_rate must be positive".into()));
        }
        if t.schedule.is_empty() {
            return Err(AnteError::Config("training schedule is empty".into()));
        }
        if t.max_sampling_attempts == 0 {
            return Err(AnteError::Config("max_sampling_attempts must be non-zero".into()));
        }
        Ok(())
    }
}
