use camino::Utf8PathBuf;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("No search pattern given")]
    #[diagnostic(
        code(args::missing_search),
        help("Pass --search <TEXT> or --search-hex <HEX>, or set `search` in sanitize.config.toml")
    )]
    MissingSearch,

    #[error("No replacement given")]
    #[diagnostic(
        code(args::missing_replacement),
        help("Pass --replace <TEXT> or --replace-hex <HEX> (use --replace \"\" to delete matches), or set `replace` in sanitize.config.toml")
    )]
    MissingReplacement,

    #[error("Invalid hex pattern: {value}")]
    #[diagnostic(
        code(args::invalid_hex),
        help("Hex patterns are pairs of hex digits, optionally separated by spaces (e.g. \"51 42 49 53\")")
    )]
    InvalidHex {
        value: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Invalid argument: {message}")]
    #[diagnostic(code(args::invalid_argument))]
    InvalidArgument { message: String },

    #[error("File not found: {path}")]
    #[diagnostic(
        code(file::not_found),
        help("Make sure the file exists and the path is correct")
    )]
    FileNotFound { path: Utf8PathBuf },

    #[error("Configuration file error")]
    #[diagnostic(
        code(config::parse_error),
        help("Check your sanitize.config.json or sanitize.config.toml file for syntax errors")
    )]
    ConfigParseError {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        #[label("error occurred here")]
        span: Option<SourceSpan>,
    },

    #[error("Failed to create backup: {path}")]
    #[diagnostic(
        code(patch::backup_failed),
        help("Check file permissions and available disk space next to the container; nothing was modified")
    )]
    BackupFailed {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to restore {path} from its backup: {reason}")]
    #[diagnostic(
        code(patch::restore_failed),
        help("Copy the .backup file over the original by hand before opening it")
    )]
    RestoreFailed { path: Utf8PathBuf, reason: String },

    #[error("{failed} of {total} file(s) did not pass verification")]
    #[diagnostic(
        code(verify::remaining),
        help("Occurrences remain, the macro project is missing, or the file could not be read back. Run without --strict to see the details only")
    )]
    VerificationFailed { failed: usize, total: usize },

    #[error("IO operation failed")]
    #[diagnostic(code(io::operation_failed))]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(core::error))]
    Core(vba_sanitize_core::Error),
}

impl CliError {
    pub fn invalid_hex(value: String, source: hex::FromHexError) -> Self {
        Self::InvalidHex { value, source }
    }

    pub fn file_not_found(path: Utf8PathBuf) -> Self {
        Self::FileNotFound { path }
    }

    pub fn config_parse_error(
        source: Box<dyn std::error::Error + Send + Sync>,
        span: Option<SourceSpan>,
    ) -> Self {
        Self::ConfigParseError { source, span }
    }

    pub fn restore_failed(path: Utf8PathBuf, reason: String) -> Self {
        Self::RestoreFailed { path, reason }
    }

    pub fn verification_failed(failed: usize, total: usize) -> Self {
        Self::VerificationFailed { failed, total }
    }
}

impl From<vba_sanitize_core::Error> for CliError {
    fn from(err: vba_sanitize_core::Error) -> Self {
        match err {
            vba_sanitize_core::Error::InvalidArgument(message) => Self::InvalidArgument { message },
            vba_sanitize_core::Error::Backup { path, source } => Self::BackupFailed { path, source },
            vba_sanitize_core::Error::Io(source) => Self::IoError { source },
            other => Self::Core(other),
        }
    }
}
