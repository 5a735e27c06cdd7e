use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnteError {
    /// The merge table stream could not be parsed.
    #[error("malformed merge table: {0}")]
    MalformedTable(String),

    /// Rejection sampling gave up before finding a pair inside the length bounds.
    #[error("no pair within length bounds after {attempts} attempts")]
    SamplingExhausted { attempts: usize },

    /// The aligned-pair index or a sentence blob is inconsistent.
    #[error("corpus error: {0}")]
    Corpus(String),

    /// Tensor or batch dimensions do not line up.
    #[error("shape error: {0}")]
    Shape(String),

    /// Checkpoint blob failed verification or decoding.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Propagated I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnteError>;
