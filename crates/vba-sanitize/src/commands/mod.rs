mod config;
mod info;
mod patch;
mod verify;

pub use config::*;
pub use info::*;
pub use patch::*;
pub use verify::*;

use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;
use vba_sanitize_core::Stage;

use crate::errors::CliError;

/// Resolve every path up front so a typo fails before any file is touched.
fn existing_files(files: &[String]) -> Result<Vec<Utf8PathBuf>, CliError> {
    files
        .iter()
        .map(|file| {
            let path = Utf8PathBuf::from(file);
            if path.is_file() {
                Ok(path)
            } else {
                Err(CliError::file_not_found(path))
            }
        })
        .collect()
}

fn validate_compression_level(level: Option<i64>) -> Result<(), CliError> {
    match level {
        Some(level) if !(0..=9).contains(&level) => Err(CliError::InvalidArgument {
            message: format!("compression level must be between 0 and 9, got {}", level),
        }),
        _ => Ok(()),
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Idle => "idle",
        Stage::BackedUp => "backed up",
        Stage::Extracted => "extracted",
        Stage::Patched => "patched",
        Stage::Repacked => "repacked",
        Stage::Swapped => "swapped",
        Stage::Verified => "verified",
    }
}

fn file_name(path: &Utf8Path) -> colored::ColoredString {
    path.file_name().unwrap_or(path.as_str()).bright_cyan().bold()
}
