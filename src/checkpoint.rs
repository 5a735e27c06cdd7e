//! Checkpoint persistence.
//!
//! Every component is stored as its own blob:
//!
//! ```text
//! [magic: 4 bytes "ANTE"][sha256(payload): 32 bytes][bincode payload]
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::corpus::Variant;
use crate::error::{AnteError, Result};
use crate::model::Model;
use crate::train::Optimizers;

pub const MAGIC: [u8; 4] = *b"ANTE";
const HEADER_LEN: usize = MAGIC.len() + 32;

pub fn to_blob<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(value).map_err(|e| AnteError::Checkpoint(format!("encode: {e}")))?;
    let digest = Sha256::digest(&payload);
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&digest);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn from_blob<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    if data.len() < HEADER_LEN || data[..MAGIC.len()] != MAGIC {
        return Err(AnteError::Checkpoint("missing checkpoint header".into()));
    }
    let (stored, payload) = data[MAGIC.len()..].split_at(32);
    let digest = Sha256::digest(payload);
    if digest.as_slice() != stored {
        return Err(AnteError::Checkpoint(format!(
            "digest mismatch: stored {} computed {}",
            hex::encode(stored),
            hex::encode(digest)
        )));
    }
    bincode::deserialize(payload).map_err(|e| AnteError::Checkpoint(format!("decode: {e}")))
}

/// Directory of per-component checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.dir.join("encoder.bin")
    }

    pub fn decoder_path(&self, variant: Variant) -> PathBuf {
        self.dir.join(format!("decoder-{variant}.bin"))
    }

    pub fn optimizer_path(&self, variant: Variant) -> PathBuf {
        self.dir.join(format!("optim-{variant}.bin"))
    }

    /// True when every model component has been saved.
    pub fn exists(&self) -> bool {
        self.encoder_path().exists()
            && Variant::ALL.iter().all(|&v| self.decoder_path(v).exists())
    }

    fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let blob = to_blob(value)?;
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &blob)?;
        fs::rename(&tmp, path)?;
        tracing::debug!(
            path = %path.display(),
            bytes = blob.len(),
            digest = %hex::encode(&blob[MAGIC.len()..HEADER_LEN]),
            "wrote checkpoint"
        );
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let data = fs::read(path).map_err(|e| {
            AnteError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {e}", path.display()),
            ))
        })?;
        from_blob(&data)
            .map_err(|e| AnteError::Checkpoint(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, model: &Model, optimizers: Option<&Optimizers>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.write(&self.encoder_path(), &model.encoder)?;
        for v in Variant::ALL {
            self.write(&self.decoder_path(v), model.decoder(v))?;
        }
        if let Some(opt) = optimizers {
            self.write(&self.optimizer_path(Variant::Secondary), &opt.secondary)?;
            self.write(&self.optimizer_path(Variant::Auxiliary), &opt.auxiliary)?;
        }
        tracing::info!(dir = %self.dir.display(), "saved checkpoint");
        Ok(())
    }

    pub fn load_model(&self) -> Result<Model> {
        Ok(Model {
            encoder: self.read(&self.encoder_path())?,
            secondary: self.read(&self.decoder_path(Variant::Secondary))?,
            auxiliary: self.read(&self.decoder_path(Variant::Auxiliary))?,
        })
    }

    /// Optimizer state, or `None` if either file is missing.
    pub fn load_optimizers(&self) -> Result<Option<Optimizers>> {
        let sec = self.optimizer_path(Variant::Secondary);
        let aux = self.optimizer_path(Variant::Auxiliary);
        if !sec.exists() || !aux.exists() {
            return Ok(None);
        }
        Ok(Some(Optimizers {
            secondary: self.read(&sec)?,
            auxiliary: self.read(&aux)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let value = vec![1.5f32, -2.0, 3.25];
        let blob = to_blob(&value).unwrap();
        assert_eq!(&blob[..4], b"ANTE");
        let back: Vec<f32> = from_blob(&blob).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn flipped_payload_bit_detected() {
        let mut blob = to_blob(&vec![7u32; 8]).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 1;
        assert!(matches!(
            from_blob::<Vec<u32>>(&blob),
            Err(AnteError::Checkpoint(_))
        ));
    }

    #[test]
    fn short_blob_rejected() {
        assert!(from_blob::<u32>(b"ANTE").is_err());
        assert!(from_blob::<u32>(&[0u8; 64]).is_err());
    }
}
