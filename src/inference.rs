//! Greedy inference with a doubling length budget.

use serde::{Deserialize, Serialize};

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::Result;
use crate::grammar::SymbolTable;
use crate::tensor::softmax;
use crate::Token;

/// Step budgets tried in order until the terminator appears.
pub const BUDGETS: [usize; 5] = [5, 10, 20, 40, 80];

pub const MIN_BOOST: f32 = -3.0;
pub const MAX_BOOST: f32 = 3.0;

/// Single-sequence greedy decode result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GreedyOutput {
    /// `[step][vocab]`
    pub outputs: Vec<Vec<f32>>,
    /// `[step][source_pos]`
    pub attention: Vec<Vec<f32>>,
    pub hard: Vec<Token>,
}

/// Anything that can run a free greedy decode for a fixed number of steps.
pub trait GreedyDecode {
    fn decode_greedy(&self, steps: usize, confidence_boost: f32) -> Result<GreedyOutput>;
}

/// An encoded source bound to the decoder that will read it.
pub struct EncodedSource<'a> {
    pub decoder: &'a Decoder,
    /// `[source_pos][enc_size]`
    pub states: Vec<Vec<f32>>,
}

impl GreedyDecode for EncodedSource<'_> {
    fn decode_greedy(&self, steps: usize, confidence_boost: f32) -> Result<GreedyOutput> {
        let enc = [self.states.clone()];
        let mut out = self.decoder.generate(&enc, steps, confidence_boost)?;
        Ok(GreedyOutput {
            outputs: out.outputs.pop().unwrap_or_default(),
            attention: out.attention.pop().unwrap_or_default(),
            hard: out.hard.pop().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub tokens: Vec<Token>,
    pub attention: Vec<Vec<f32>>,
    pub outputs: Vec<Vec<f32>>,
    pub confidence: f64,
    /// The terminator was produced within some budget.
    pub did_cutoff: bool,
}

/// Product of each step's normalized probability for its chosen token.
pub fn confidence(outputs: &[Vec<f32>], hard: &[Token]) -> f64 {
    outputs
        .iter()
        .zip(hard)
        .map(|(out, &tok)| {
            softmax(out)
                .get(tok as usize)
                .copied()
                .unwrap_or(0.0) as f64
        })
        .product()
}

/// Decode with growing budgets, truncating at the first terminator.
pub fn run_inference<D: GreedyDecode + ?Sized>(
    decoder: &D,
    terminator: Token,
    confidence_boost: f32,
) -> Result<Translation> {
    let mut last = GreedyOutput::default();
    for &budget in &BUDGETS {
        let mut out = decoder.decode_greedy(budget, confidence_boost)?;
        if let Some(cut) = out.hard.iter().position(|&t| t == terminator) {
            tracing::debug!(budget, cut, "terminator reached");
            out.hard.truncate(cut);
            out.outputs.truncate(cut);
            out.attention.truncate(cut);
            return Ok(finish(out, true));
        }
        last = out;
    }
    tracing::debug!(budget = BUDGETS[BUDGETS.len() - 1], "no terminator within budget");
    Ok(finish(last, false))
}

fn finish(out: GreedyOutput, did_cutoff: bool) -> Translation {
    Translation {
        confidence: confidence(&out.outputs, &out.hard),
        tokens: out.hard,
        attention: out.attention,
        outputs: out.outputs,
        did_cutoff,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub input: String,
    #[serde(default)]
    pub confidence_boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub result: String,
    pub confidence: f64,
}

/// JSON body reported when a request cannot be parsed or translated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextTranslation {
    pub text: String,
    pub translation: Translation,
}

/// Text-in, text-out translation for one source/target pairing.
pub struct Translator<'a> {
    pub source: &'a SymbolTable,
    pub target: &'a SymbolTable,
    pub encoder: &'a Encoder,
    pub decoder: &'a Decoder,
}

impl<'a> Translator<'a> {
    pub fn new(
        source: &'a SymbolTable,
        target: &'a SymbolTable,
        encoder: &'a Encoder,
        decoder: &'a Decoder,
    ) -> Self {
        Self {
            source,
            target,
            encoder,
            decoder,
        }
    }

    pub fn translate(&self, text: &str, confidence_boost: f32) -> Result<TextTranslation> {
        let mut tokens = self.source.encode(text);
        tokens.push(self.source.terminator());
        let mut encoded = self.encoder.encode_tokens(&tokens);
        let states = encoded.states.pop().unwrap_or_default();
        let bound = EncodedSource {
            decoder: self.decoder,
            states,
        };
        let translation = run_inference(&bound, self.target.terminator(), confidence_boost)?;
        Ok(TextTranslation {
            text: self.target.decode(&translation.tokens),
            translation,
        })
    }

    /// Request handler: the boost defaults to 1 and is clamped to
    /// `[MIN_BOOST, MAX_BOOST]`; results without a terminator end in `...`.
    pub fn handle(&self, req: &TranslateRequest) -> Result<TranslateResponse> {
        let boost = req
            .confidence_boost
            .filter(|b| b.is_finite())
            .unwrap_or(1.0)
            .clamp(MIN_BOOST, MAX_BOOST);
        let out = self.translate(&req.input, boost)?;
        let mut result = out.text;
        if !out.translation.did_cutoff {
            result.push_str("...");
        }
        Ok(TranslateResponse {
            result,
            confidence: out.translation.confidence,
        })
    }
}
