use std::io;

use thiserror::Error;

/// Errors surfaced by subprocess mode.
///
/// The REPL prints these prefixed with `coral: subprocess mode:`; the
/// messages themselves carry only the failure.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Multiple redirects for {0}")]
    MultipleRedirects(&'static str),

    #[error("Multiple inputs for stdin")]
    MultipleStdin,

    #[error("Unrecognized redirection command: {0}")]
    UnrecognizedRedirect(String),

    #[error("{0}: no such file or directory")]
    FileOpenFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// `suggestions` is either empty or a newline-prefixed "did you mean"
    /// block computed from the alias table and `PATH`.
    #[error("command not found: {name}{suggestions}")]
    CommandNotFound { name: String, suggestions: String },

    #[error("failed to set up pipe: {0}")]
    Pipe(#[from] io::Error),

    #[error("{name}: {source}")]
    Spawn { name: String, source: io::Error },
}
