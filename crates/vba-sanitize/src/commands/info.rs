use camino::Utf8PathBuf;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use vba_sanitize_core::archive::{list_entries, read_entry};
use vba_sanitize_core::{count_occurrences, EntrySummary};

use super::{existing_files, file_name};
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::describe_bytes;
use crate::utils::job::{resolve_job, PatternOpts};

pub struct InfoContainerArgs {
    pub file: String,
    pub pattern: PatternOpts,
    pub json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerInfo {
    container: Utf8PathBuf,
    target_entry: String,
    has_target_entry: bool,
    /// Only present when a search pattern was given.
    occurrences: Option<usize>,
    entries: Vec<EntrySummary>,
}

/// List the entries of a container and, given a pattern, count it in the
/// macro project without modifying anything.
pub fn info_container(args: InfoContainerArgs) -> Result<()> {
    let settings = resolve_job(&args.pattern, None, None)?;
    let container = existing_files(std::slice::from_ref(&args.file))?
        .pop()
        .ok_or_else(|| CliError::file_not_found(Utf8PathBuf::from(&args.file)))?;

    let entries = list_entries(&container).map_err(CliError::from)?;
    let has_target_entry = entries.iter().any(|entry| entry.name == settings.entry);

    let occurrences = match &settings.search {
        Some(_) if has_target_entry => {
            let search = settings.require_search()?;
            let blob = read_entry(&container, &settings.entry)
                .map_err(CliError::from)?
                .unwrap_or_default();
            Some(count_occurrences(&blob, search).map_err(CliError::from)?)
        }
        Some(_) => {
            settings.require_search()?;
            None
        }
        None => None,
    };

    let info = ContainerInfo {
        container,
        target_entry: settings.entry.clone(),
        has_target_entry,
        occurrences,
        entries,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info).into_diagnostic()?);
        return Ok(());
    }

    println!(
        "{} {}",
        "📦 Container:".bright_blue().bold(),
        file_name(&info.container)
    );
    println_pad!(
        "{} {}",
        "Entries:".bright_white(),
        info.entries.len().to_string().bright_white().bold()
    );
    println!();

    for entry in &info.entries {
        let size = if entry.is_dir {
            "dir".dimmed()
        } else {
            format!("{} → {} bytes", entry.size, entry.compressed_size).dimmed()
        };
        if entry.name == info.target_entry {
            println_pad!(
                "{} {} {}",
                "★".bright_yellow(),
                entry.name.bright_yellow().bold(),
                size
            );
        } else {
            println_pad!("{} {} {}", "•".bright_cyan(), entry.name, size);
        }
    }
    println!();

    if !info.has_target_entry {
        println_pad!(
            "{} {}",
            "⚠".bright_yellow(),
            format!("No macro project at {}", info.target_entry).bright_yellow()
        );
    }

    if let (Some(count), Some(search)) = (info.occurrences, settings.search.as_deref()) {
        let count = if count == 0 {
            count.to_string().bright_green()
        } else {
            count.to_string().bright_red().bold()
        };
        println_pad!(
            "{} {} {}",
            "Occurrences of".bright_white(),
            describe_bytes(search).bright_yellow(),
            count
        );
    }

    Ok(())
}
