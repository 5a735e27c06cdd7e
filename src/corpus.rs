//! Aligned-pair index over memory-mapped sentence blobs.
//!
//! A links file is a flat array of [`LinkRecord`]s. Each record points into
//! the primary sentence blob and into the blob of one target variant. Blobs
//! are flat arrays of little-endian `u16` token ids.

use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use crate::config::PathConfig;
use crate::error::{AnteError, Result};
use crate::grammar::GrammarSet;
use crate::Token;

/// Target language variant. The primary variant is always the source side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[serde(alias = "sec")]
    Secondary,
    #[serde(alias = "aux")]
    Auxiliary,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Secondary, Variant::Auxiliary];

    /// Short tag used in file names.
    pub fn tag(self) -> &'static str {
        match self {
            Variant::Secondary => "sec",
            Variant::Auxiliary => "aux",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Variant {
    type Err = AnteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sec" | "secondary" => Ok(Variant::Secondary),
            "aux" | "auxiliary" => Ok(Variant::Auxiliary),
            other => Err(AnteError::Config(format!("unknown variant '{other}'"))),
        }
    }
}

/// One entry of a links file: byte offsets and lengths into two blobs.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct LinkRecord {
    pub source_offset: u32,
    pub source_len: u32,
    pub target_offset: u32,
    pub target_len: u32,
}

impl LinkRecord {
    pub const SIZE: usize = std::mem::size_of::<LinkRecord>();

    fn from_le_slice(bytes: &[u8]) -> Self {
        let raw: LinkRecord = bytemuck::pod_read_unaligned(bytes);
        Self {
            source_offset: u32::from_le(raw.source_offset),
            source_len: u32::from_le(raw.source_len),
            target_offset: u32::from_le(raw.target_offset),
            target_len: u32::from_le(raw.target_len),
        }
    }

    /// Little-endian on-disk encoding.
    pub fn to_le_bytes(&self) -> [u8; LinkRecord::SIZE] {
        let mut out = [0u8; LinkRecord::SIZE];
        for (i, v) in [
            self.source_offset,
            self.source_len,
            self.target_offset,
            self.target_len,
        ]
        .into_iter()
        .enumerate()
        {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Read-only byte storage, either mapped from disk or held in memory.
pub enum Blob {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Blob {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Blob::Mapped(mmap))
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Blob::Mapped(m) => &m[..],
            Blob::Owned(v) => &v[..],
        }
    }
}

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self {
        Blob::Owned(v)
    }
}

/// Unpadded pair of token sequences, each ending with its table's terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentencePair {
    pub source: Vec<Token>,
    pub target: Vec<Token>,
}

/// Anything that can draw a random aligned pair for a target variant.
pub trait PairSource {
    fn draw(&self, variant: Variant, rng: &mut dyn rand::RngCore) -> Result<SentencePair>;
}

/// Links plus target sentences for one variant.
pub struct VariantIndex {
    links: Blob,
    sentences: Blob,
    terminator: Token,
}

impl VariantIndex {
    pub fn new(links: Blob, sentences: Blob, terminator: Token) -> Result<Self> {
        if links.len() % LinkRecord::SIZE != 0 {
            return Err(AnteError::Corpus(format!(
                "links size {} is not a multiple of {}",
                links.len(),
                LinkRecord::SIZE
            )));
        }
        Ok(Self {
            links,
            sentences,
            terminator,
        })
    }

    pub fn len(&self) -> usize {
        self.links.len() / LinkRecord::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn link(&self, index: usize) -> Option<LinkRecord> {
        let start = index.checked_mul(LinkRecord::SIZE)?;
        let bytes = self.links.get(start..start + LinkRecord::SIZE)?;
        Some(LinkRecord::from_le_slice(bytes))
    }
}

/// Aligned-pair index: the primary blob shared by every target variant.
pub struct Corpus {
    primary: Blob,
    primary_terminator: Token,
    secondary: Option<VariantIndex>,
    auxiliary: Option<VariantIndex>,
}

impl Corpus {
    pub fn new(primary: Blob, primary_terminator: Token) -> Self {
        Self {
            primary,
            primary_terminator,
            secondary: None,
            auxiliary: None,
        }
    }

    /// Map the primary blob and every variant index found under `paths`.
    pub fn open(paths: &PathConfig, grammars: &GrammarSet) -> Result<Self> {
        let mut corpus = Self::new(
            Blob::open(paths.primary_sentences())?,
            grammars.primary.terminator(),
        );
        for variant in Variant::ALL {
            let index = VariantIndex::new(
                Blob::open(paths.links(variant))?,
                Blob::open(paths.sentences(variant))?,
                grammars.target(variant).terminator(),
            )?;
            tracing::info!(%variant, pairs = index.len(), "mapped pair index");
            corpus = corpus.with_variant(variant, index);
        }
        Ok(corpus)
    }

    pub fn with_variant(mut self, variant: Variant, index: VariantIndex) -> Self {
        match variant {
            Variant::Secondary => self.secondary = Some(index),
            Variant::Auxiliary => self.auxiliary = Some(index),
        }
        self
    }

    pub fn variant(&self, variant: Variant) -> Option<&VariantIndex> {
        match variant {
            Variant::Secondary => self.secondary.as_ref(),
            Variant::Auxiliary => self.auxiliary.as_ref(),
        }
    }

    /// Resolve link `index` of `variant` into a terminated sentence pair.
    pub fn pair(&self, variant: Variant, index: usize) -> Result<SentencePair> {
        let vi = self
            .variant(variant)
            .ok_or_else(|| AnteError::Corpus(format!("no index loaded for variant {variant}")))?;
        let link = vi
            .link(index)
            .ok_or_else(|| AnteError::Corpus(format!("link {index} out of range")))?;
        let mut source = read_tokens(&self.primary, link.source_offset, link.source_len)?;
        source.push(self.primary_terminator);
        let mut target = read_tokens(&vi.sentences, link.target_offset, link.target_len)?;
        target.push(vi.terminator);
        Ok(SentencePair { source, target })
    }
}

impl PairSource for Corpus {
    fn draw(&self, variant: Variant, rng: &mut dyn rand::RngCore) -> Result<SentencePair> {
        let n = self.variant(variant).map_or(0, VariantIndex::len);
        if n == 0 {
            return Err(AnteError::Corpus(format!("empty index for variant {variant}")));
        }
        self.pair(variant, rng.gen_range(0..n))
    }
}

fn read_tokens(blob: &[u8], offset: u32, len: u32) -> Result<Vec<Token>> {
    let (start, len) = (offset as usize, len as usize);
    if len % 2 != 0 {
        return Err(AnteError::Corpus(format!("odd sentence byte length {len}")));
    }
    let bytes = blob.get(start..start + len).ok_or_else(|| {
        AnteError::Corpus(format!(
            "sentence {start}..{} outside blob of {} bytes",
            start + len,
            blob.len()
        ))
    })?;
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]) as Token)
        .collect())
}

/// Serialize token sentences into a blob plus their `(offset, len)` spans.
pub fn write_sentences(sentences: &[Vec<u16>]) -> (Vec<u8>, Vec<(u32, u32)>) {
    let mut blob = Vec::new();
    let mut spans = Vec::with_capacity(sentences.len());
    for s in sentences {
        let offset = blob.len() as u32;
        for t in s {
            blob.extend_from_slice(&t.to_le_bytes());
        }
        spans.push((offset, (s.len() * 2) as u32));
    }
    (blob, spans)
}
