//! Shared encoder plus one decoder per target variant.

use rand::Rng;

use crate::config::ModelConfig;
use crate::corpus::Variant;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::grammar::GrammarSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub encoder: Encoder,
    pub secondary: Decoder,
    pub auxiliary: Decoder,
}

impl Model {
    /// Fresh parameters sized to the loaded grammars.
    pub fn new<R: Rng + ?Sized>(cfg: &ModelConfig, grammars: &GrammarSet, rng: &mut R) -> Self {
        Self::with_vocab(
            cfg,
            grammars.primary.n_tokens(),
            [
                grammars.secondary.n_tokens(),
                grammars.auxiliary.n_tokens(),
            ],
            rng,
        )
    }

    /// Fresh parameters for explicit vocabulary sizes `[secondary, auxiliary]`.
    pub fn with_vocab<R: Rng + ?Sized>(
        cfg: &ModelConfig,
        source_vocab: usize,
        target_vocab: [usize; 2],
        rng: &mut R,
    ) -> Self {
        let encoder = Encoder::new(source_vocab, cfg.emb_size, cfg.enc_hidden, rng);
        let enc_size = encoder.output_size();
        let mut decoder = |vocab| {
            Decoder::new(
                vocab,
                cfg.emb_size,
                enc_size,
                cfg.dec_hidden,
                cfg.attn_hidden,
                rng,
            )
        };
        let secondary = decoder(target_vocab[0]);
        let auxiliary = decoder(target_vocab[1]);
        Self {
            encoder,
            secondary,
            auxiliary,
        }
    }

    pub fn decoder(&self, variant: Variant) -> &Decoder {
        match variant {
            Variant::Secondary => &self.secondary,
            Variant::Auxiliary => &self.auxiliary,
        }
    }

    /// Encoder and the decoder for `variant`, both mutable.
    pub fn parts_mut(&mut self, variant: Variant) -> (&mut Encoder, &mut Decoder) {
        match variant {
            Variant::Secondary => (&mut self.encoder, &mut self.secondary),
            Variant::Auxiliary => (&mut self.encoder, &mut self.auxiliary),
        }
    }
}
