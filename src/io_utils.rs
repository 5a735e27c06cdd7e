use std::fmt;
use std::io;
use std::path::Path;

use crate::error::AnteError;

#[derive(Debug)]
pub struct CliError {
    pub msg: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Format a user friendly I/O error message with suggestions.
pub fn format_io_error(operation: &str, path: &Path, err: &io::Error) -> String {
    use io::ErrorKind::*;
    let suggestion = match err.kind() {
        NotFound => "Check that the file exists and the path is correct.",
        PermissionDenied => "Check permissions or run as a different user.",
        UnexpectedEof => "File appears truncated or corrupted.",
        WriteZero => "Disk may be full. Free up space and try again.",
        _ => "Check permissions or free up disk space.",
    };
    format!(
        "Error {} '{}': {}. {}",
        operation,
        path.display(),
        err,
        suggestion
    )
}

/// Convert an I/O error into a CLI error with context.
pub fn io_cli_error(operation: &str, path: &Path, err: io::Error) -> CliError {
    CliError {
        msg: format_io_error(operation, path, &err),
        source: Some(Box::new(err)),
    }
}

pub fn simple_cli_error(msg: &str) -> CliError {
    CliError {
        msg: msg.to_string(),
        source: None,
    }
}

/// Convert a library error into a CLI error with a hint.
pub fn ante_cli_error(context: &str, err: AnteError) -> CliError {
    CliError {
        msg: format!("{}: {}", context, cli_hint(&err)),
        source: Some(Box::new(err)),
    }
}

/// Return an actionable hint for an error variant.
pub fn cli_hint(err: &AnteError) -> String {
    use AnteError::*;
    match err {
        MalformedTable(msg) => format!("{msg}. Rebuild the ngrams-*.bin tables."),
        SamplingExhausted { attempts } => format!(
            "no usable pair after {attempts} draws. Check the pair index or raise max_sampling_attempts."
        ),
        Corpus(msg) => format!("{msg}. The sentence blobs and link index are out of sync."),
        Shape(msg) => format!("{msg}. Checkpoint and symbol tables probably disagree."),
        Checkpoint(msg) => format!("{msg}. Delete the save directory to start fresh."),
        Config(msg) => format!("{msg}. Invalid configuration."),
        Io(io) => format!("{io}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_keeps_context() {
        let e = ante_cli_error("loading", AnteError::SamplingExhausted { attempts: 3 });
        assert!(e.to_string().starts_with("loading: "));
        assert!(e.to_string().contains("after 3 draws"));
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn missing_file_suggestion() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let msg = format_io_error("reading", Path::new("x.bin"), &err);
        assert!(msg.contains("'x.bin'"));
        assert!(msg.contains("Check that the file exists"));
    }
}
