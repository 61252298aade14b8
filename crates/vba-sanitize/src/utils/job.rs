//! Job settings: what to search for, what to replace it with, and where.
//!
//! Values are merged from three places, first match wins:
//!
//! 1. command line flags
//! 2. a job file (`sanitize.config.json` or `sanitize.config.toml`)
//! 3. the application config (`config.toml` next to the executable)

use camino::{Utf8Path, Utf8PathBuf};
use miette::SourceSpan;
use serde::{Deserialize, Serialize};
use vba_sanitize_core::{Patch, TextEncoding, DEFAULT_TARGET_ENTRY};

use crate::errors::CliError;
use crate::utils::config::{self, AppConfig};
use crate::utils::parse_hex_pattern;

pub const JOB_CONFIG_STEM: &str = "sanitize.config";

/// Contents of a job file.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobFile {
    pub search: Option<String>,
    pub search_hex: Option<String>,
    pub replace: Option<String>,
    pub replace_hex: Option<String>,
    pub entry: Option<String>,
    pub encoding: Option<TextEncoding>,
    pub compression_level: Option<i64>,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct PatternOpts {
    /// Text to search for inside the macro project
    #[arg(short, long, conflicts_with = "search_hex")]
    pub search: Option<String>,

    /// Bytes to search for, as hex (e.g. "51 42 49 53")
    #[arg(long)]
    pub search_hex: Option<String>,

    /// Archive path of the macro project [default: xl/vbaProject.bin]
    #[arg(short, long)]
    pub entry: Option<String>,

    /// How search/replace text is turned into bytes (utf-8 or latin-1)
    #[arg(long)]
    pub encoding: Option<TextEncoding>,

    /// Job file (defaults to sanitize.config.json or sanitize.config.toml in the current directory)
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ReplaceOpts {
    /// Replacement text
    #[arg(short, long, conflicts_with = "replace_hex")]
    pub replace: Option<String>,

    /// Replacement bytes, as hex
    #[arg(long)]
    pub replace_hex: Option<String>,
}

/// Fully merged settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    pub search: Option<Vec<u8>>,
    pub replacement: Option<Vec<u8>>,
    pub entry: String,
    pub encoding: TextEncoding,
    pub compression_level: Option<i64>,
    /// Job file the settings were read from, if any.
    pub job_file: Option<Utf8PathBuf>,
}

impl JobSettings {
    pub fn require_search(&self) -> Result<&[u8], CliError> {
        match self.search.as_deref() {
            Some(search) if !search.is_empty() => Ok(search),
            Some(_) => Err(CliError::InvalidArgument {
                message: "search pattern must not be empty".to_string(),
            }),
            None => Err(CliError::MissingSearch),
        }
    }

    pub fn require_patch(&self) -> Result<Patch, CliError> {
        let search = self.require_search()?;
        let replacement = self
            .replacement
            .as_deref()
            .ok_or(CliError::MissingReplacement)?;

        Ok(Patch::new(search, replacement)?)
    }
}

/// Merge command line options with the job file and application config.
pub fn resolve_job(
    pattern: &PatternOpts,
    replace: Option<&ReplaceOpts>,
    compression_level: Option<i64>,
) -> Result<JobSettings, CliError> {
    let job_file = resolve_job_config_path(pattern.config.as_deref())?;
    let job = match &job_file {
        Some(path) => load_job_config(path)?,
        None => JobFile::default(),
    };

    let mut settings = merge_job(
        pattern,
        replace,
        compression_level,
        &job,
        &config::load_config(),
    )?;
    settings.job_file = job_file;
    Ok(settings)
}

fn merge_job(
    pattern: &PatternOpts,
    replace: Option<&ReplaceOpts>,
    compression_level: Option<i64>,
    job: &JobFile,
    app: &AppConfig,
) -> Result<JobSettings, CliError> {
    let encoding = pattern
        .encoding
        .or(job.encoding)
        .or(app.default_encoding)
        .unwrap_or_default();

    let search = match pattern_bytes(
        pattern.search.as_deref(),
        pattern.search_hex.as_deref(),
        encoding,
    )? {
        Some(bytes) => Some(bytes),
        None => pattern_bytes(job.search.as_deref(), job.search_hex.as_deref(), encoding)?,
    };

    let cli_replacement = match replace {
        Some(opts) => pattern_bytes(opts.replace.as_deref(), opts.replace_hex.as_deref(), encoding)?,
        None => None,
    };
    let replacement = match cli_replacement {
        Some(bytes) => Some(bytes),
        None => pattern_bytes(job.replace.as_deref(), job.replace_hex.as_deref(), encoding)?,
    };

    let entry = pattern
        .entry
        .clone()
        .or_else(|| job.entry.clone())
        .or_else(|| app.default_entry.clone())
        .unwrap_or_else(|| DEFAULT_TARGET_ENTRY.to_string());

    Ok(JobSettings {
        search,
        replacement,
        entry,
        encoding,
        compression_level: compression_level
            .or(job.compression_level)
            .or(app.compression_level),
        job_file: None,
    })
}

fn pattern_bytes(
    text: Option<&str>,
    hex: Option<&str>,
    encoding: TextEncoding,
) -> Result<Option<Vec<u8>>, CliError> {
    if let Some(hex) = hex {
        return parse_hex_pattern(hex).map(Some);
    }

    text.map(|text| encoding.encode(text).map_err(CliError::from))
        .transpose()
}

fn resolve_job_config_path(explicit: Option<&str>) -> Result<Option<Utf8PathBuf>, CliError> {
    match explicit {
        Some(path) => {
            let path = Utf8PathBuf::from(path);
            if !path.is_file() {
                return Err(CliError::file_not_found(path));
            }
            Ok(Some(path))
        }
        None => {
            let cwd = std::env::current_dir()?;
            Ok(Utf8PathBuf::from_path_buf(cwd)
                .ok()
                .and_then(|cwd| find_job_config(&cwd)))
        }
    }
}

/// Look for a job file in `dir`, JSON first, then TOML.
pub fn find_job_config(dir: &Utf8Path) -> Option<Utf8PathBuf> {
    ["json", "toml"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", JOB_CONFIG_STEM, ext)))
        .find(|path| path.is_file())
}

pub fn load_job_config(path: &Utf8Path) -> Result<JobFile, CliError> {
    let content = std::fs::read_to_string(path)?;

    match path.extension() {
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| CliError::config_parse_error(Box::new(e), None)),
        Some("toml") => {
            toml::from_str(&content).map_err(|e| {
                let span: Option<SourceSpan> = e.span().map(|range| range.into());
                CliError::config_parse_error(Box::new(e), span)
            })
        }
        _ => Err(CliError::InvalidArgument {
            message: format!(
                "unsupported job file '{}', expected {}.json or {}.toml",
                path, JOB_CONFIG_STEM, JOB_CONFIG_STEM
            ),
        }),
    }
}
