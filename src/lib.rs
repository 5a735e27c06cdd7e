//! Neural translation between constructed-language variants.
//!
//! Text is compressed into token ids by a merge-table codec
//! ([`grammar`]), aligned sentence pairs are sampled into padded batches
//! ([`batch`]), and a bidirectional recurrent encoder feeds one attention
//! decoder per target variant ([`encoder`], [`decoder`]). Training lives in
//! [`train`]; greedy translation with confidence scoring in [`inference`].

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod corpus;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod grammar;
pub mod inference;
pub mod io_utils;
pub mod model;
pub mod optim;
pub mod tensor;
pub mod train;

/// Index into a symbol table.
pub type Token = u32;

/// Padding sentinel in batch matrices. Never a valid token id; reduced modulo
/// the vocabulary wherever it meets an embedding or a loss target.
pub const PAD: i32 = -1;

pub use batch::{build_batch, Batch, LengthBudget, TokenMatrix};
pub use checkpoint::CheckpointStore;
pub use config::{Config, ModelConfig, PathConfig, TrainConfig};
pub use corpus::{Corpus, PairSource, SentencePair, Variant};
pub use decoder::{DecodeOptions, DecodeTarget, Decoder, DecoderOutput};
pub use encoder::{Encoder, EncoderOutput};
pub use error::{AnteError, Result};
pub use grammar::{GrammarSet, Symbol, SymbolTable};
pub use inference::{
    confidence, run_inference, ErrorResponse, GreedyDecode, TranslateRequest, TranslateResponse,
    Translation, Translator,
};
pub use model::Model;
pub use train::{EpochSummary, Optimizers, StepMetrics, Trainer};
