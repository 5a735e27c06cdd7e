//! Merge-table codec ("grammar") mapping text to compact token ids and back.
//!
//! A table is read from a stream of fixed-width tagged records:
//!
//! ```text
//! [tag: u8][payload: 8 bytes]
//! ```
//!
//! * **tag 1..=8** – an atomic symbol. The payload holds `tag` bytes of UTF-8
//!   text followed by zero padding. Text longer than one character (a base
//!   letter plus combining marks, say) decodes verbatim but is never produced
//!   by `encode`, which works one character at a time.
//! * **tag 0** – a pair symbol. The payload holds the left index as a
//!   little-endian `u32` and the right index as a little-endian `i32`.
//!
//! Pair records may only reference indices defined earlier in the stream, so
//! the table is topologically sorted. After loading, a terminator symbol is
//! appended as the last index.

use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::config::PathConfig;
use crate::corpus::Variant;
use crate::error::{AnteError, Result};
use crate::Token;

/// Width of every record payload in bytes.
pub const RECORD_PAYLOAD: usize = 8;
/// Tag byte introducing a pair record.
pub const PAIR_TAG: u8 = 0;
/// Diagnostic rendering of the terminator symbol.
pub const TERMINATOR_LABEL: &str = "<EOF>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    /// A single literal character.
    Atomic(char),
    /// Literal text of several characters.
    Cluster(Box<str>),
    /// Merge of two earlier symbols.
    Pair(Token, Token),
    /// End-of-sequence marker appended to every table.
    Terminator,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PairRecord {
    left: [u8; 4],
    right: [u8; 4],
}

/// Immutable symbol table loaded once at startup.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    atoms: HashMap<char, Token>,
    rules: Vec<(Token, Token, Token)>,
}

impl SymbolTable {
    /// Parse a merge table from `reader` and append the terminator.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut symbols = Vec::new();
        loop {
            let mut tag = [0u8; 1];
            match reader.read(&mut tag) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            let index = symbols.len();
            let mut payload = [0u8; RECORD_PAYLOAD];
            reader.read_exact(&mut payload).map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => {
                    AnteError::MalformedTable(format!("truncated record at index {index}"))
                }
                _ => AnteError::Io(e),
            })?;
            symbols.push(parse_record(tag[0], &payload, index)?);
        }
        Ok(Self::from_symbols(symbols))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_reader(data)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Build a table from already-validated content symbols.
    fn from_symbols(mut symbols: Vec<Symbol>) -> Self {
        let mut atoms = HashMap::new();
        let mut rules = Vec::new();
        for (i, sym) in symbols.iter().enumerate() {
            match *sym {
                Symbol::Atomic(ch) => {
                    atoms.entry(ch).or_insert(i as Token);
                }
                Symbol::Pair(l, r) => rules.push((i as Token, l, r)),
                Symbol::Cluster(_) | Symbol::Terminator => {}
            }
        }
        symbols.push(Symbol::Terminator);
        Self {
            symbols,
            atoms,
            rules,
        }
    }

    /// Number of symbols including the terminator.
    pub fn n_tokens(&self) -> usize {
        self.symbols.len()
    }

    /// Id of the terminator symbol (always the last index).
    pub fn terminator(&self) -> Token {
        (self.symbols.len() - 1) as Token
    }

    pub fn symbol(&self, id: Token) -> Option<&Symbol> {
        self.symbols.get(id as usize)
    }

    /// Encode `text`, returning the tokens and every character that had no
    /// atomic symbol.
    pub fn encode_report(&self, text: &str) -> (Vec<Token>, Vec<char>) {
        let mut missing = Vec::new();
        let mut tokens: Vec<Token> = Vec::with_capacity(text.len());
        for ch in text.chars() {
            match self.atoms.get(&ch) {
                Some(&id) => tokens.push(id),
                None => missing.push(ch),
            }
        }

        // Rules are in topological order, so one ordered sweep applies every
        // merge whose operands can exist.
        for &(id, left, right) in &self.rules {
            if tokens.len() < 2 {
                break;
            }
            let mut merged = Vec::with_capacity(tokens.len());
            let mut at = 0;
            while at < tokens.len() {
                if tokens[at] == left && tokens.get(at + 1) == Some(&right) {
                    merged.push(id);
                    at += 2;
                } else {
                    merged.push(tokens[at]);
                    at += 1;
                }
            }
            tokens = merged;
        }
        (tokens, missing)
    }

    /// Encode `text`, skipping (and logging) characters absent from the table.
    pub fn encode(&self, text: &str) -> Vec<Token> {
        let (tokens, missing) = self.encode_report(text);
        for ch in missing {
            tracing::warn!(character = ?ch, "character not found in symbol table");
        }
        tokens
    }

    /// Expand `tokens` into their literal text. The terminator and unknown ids
    /// contribute nothing.
    pub fn decode(&self, tokens: &[Token]) -> String {
        let mut out = String::new();
        for &tok in tokens {
            self.expand_into(tok, &mut out);
        }
        out
    }

    fn expand_into(&self, root: Token, out: &mut String) {
        let limit = self.symbols.len();
        let mut stack = vec![(root, 0usize)];
        while let Some((tok, depth)) = stack.pop() {
            if depth > limit {
                tracing::warn!(token = root, "pair expansion exceeded table depth");
                return;
            }
            match self.symbol(tok) {
                Some(Symbol::Atomic(ch)) => out.push(*ch),
                Some(Symbol::Cluster(text)) => out.push_str(text),
                Some(Symbol::Pair(l, r)) => {
                    stack.push((*r, depth + 1));
                    stack.push((*l, depth + 1));
                }
                Some(Symbol::Terminator) => {}
                None => tracing::debug!(token = tok, "token id outside symbol table"),
            }
        }
    }

    /// Slash-separated rendering for logs. A run of terminators shows as
    /// `<EOF>` followed by a single `...`.
    pub fn render(&self, tokens: &[Token]) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(tokens.len());
        let mut run = 0;
        for &tok in tokens {
            if tok == self.terminator() {
                match run {
                    0 => parts.push(TERMINATOR_LABEL.to_string()),
                    1 => parts.push("...".to_string()),
                    _ => {}
                }
                run += 1;
            } else {
                parts.push(self.decode(&[tok]));
                run = 0;
            }
        }
        parts.join("/")
    }
}

fn parse_record(tag: u8, payload: &[u8; RECORD_PAYLOAD], index: usize) -> Result<Symbol> {
    match tag {
        PAIR_TAG => {
            let record: PairRecord = bytemuck::pod_read_unaligned(payload);
            let left = u32::from_le_bytes(record.left);
            let right = i32::from_le_bytes(record.right);
            if right < 0 {
                return Err(AnteError::MalformedTable(format!(
                    "pair {index} has negative right index {right}"
                )));
            }
            let right = right as u32;
            if left as usize >= index || right as usize >= index {
                return Err(AnteError::MalformedTable(format!(
                    "pair {index} references ({left}, {right}) which are not earlier symbols"
                )));
            }
            Ok(Symbol::Pair(left, right))
        }
        1..=8 => {
            let len = tag as usize;
            let text = std::str::from_utf8(&payload[..len]).map_err(|e| {
                AnteError::MalformedTable(format!("atom {index} is not UTF-8: {e}"))
            })?;
            let mut chars = text.chars();
            Ok(match (chars.next(), chars.next()) {
                (Some(ch), None) => Symbol::Atomic(ch),
                _ => Symbol::Cluster(text.into()),
            })
        }
        other => Err(AnteError::MalformedTable(format!(
            "unknown tag {other} at index {index}"
        ))),
    }
}

/// Serialize content symbols into the merge-table record format.
///
/// The terminator is implicit and never written. Cluster text must be
/// non-empty and fit in one payload.
pub fn write_records(symbols: &[Symbol]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(symbols.len() * (1 + RECORD_PAYLOAD));
    for (index, sym) in symbols.iter().enumerate() {
        match *sym {
            Symbol::Atomic(ch) => {
                let mut buf = [0u8; RECORD_PAYLOAD];
                let len = ch.encode_utf8(&mut buf).len();
                out.push(len as u8);
                out.extend_from_slice(&buf);
            }
            Symbol::Cluster(ref text) => {
                let bytes = text.as_bytes();
                if bytes.is_empty() || bytes.len() > RECORD_PAYLOAD {
                    return Err(AnteError::MalformedTable(format!(
                        "atom {index} spans {} bytes",
                        bytes.len()
                    )));
                }
                let mut buf = [0u8; RECORD_PAYLOAD];
                buf[..bytes.len()].copy_from_slice(bytes);
                out.push(bytes.len() as u8);
                out.extend_from_slice(&buf);
            }
            Symbol::Pair(l, r) => {
                let record = PairRecord {
                    left: l.to_le_bytes(),
                    right: (r as i32).to_le_bytes(),
                };
                out.push(PAIR_TAG);
                out.extend_from_slice(bytemuck::bytes_of(&record));
            }
            Symbol::Terminator => {}
        }
    }
    Ok(out)
}

/// Symbol tables for the primary variant and both target variants.
#[derive(Debug, Clone)]
pub struct GrammarSet {
    pub primary: SymbolTable,
    pub secondary: SymbolTable,
    pub auxiliary: SymbolTable,
}

impl GrammarSet {
    pub fn load(paths: &PathConfig) -> Result<Self> {
        let load = |path: std::path::PathBuf| {
            SymbolTable::from_path(&path).map_err(|e| match e {
                AnteError::Io(io) => AnteError::Io(std::io::Error::new(
                    io.kind(),
                    format!("{}: {io}", path.display()),
                )),
                other => other,
            })
        };
        let set = Self {
            primary: load(paths.primary_grammar())?,
            secondary: load(paths.grammar(Variant::Secondary))?,
            auxiliary: load(paths.grammar(Variant::Auxiliary))?,
        };
        tracing::info!(
            primary = set.primary.n_tokens(),
            secondary = set.secondary.n_tokens(),
            auxiliary = set.auxiliary.n_tokens(),
            "loaded symbol tables"
        );
        Ok(set)
    }

    pub fn target(&self, variant: Variant) -> &SymbolTable {
        match variant {
            Variant::Secondary => &self.secondary,
            Variant::Auxiliary => &self.auxiliary,
        }
    }
}
