use camino::Utf8PathBuf;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use vba_sanitize_core::{verify, Verification};

use super::patch::describe_verification;
use super::{existing_files, file_name};
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::describe_bytes;
use crate::utils::job::{resolve_job, PatternOpts};

#[derive(Debug)]
pub struct VerifyContainersArgs {
    pub files: Vec<String>,
    pub pattern: PatternOpts,
    pub strict: bool,
    pub json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResult {
    container: Utf8PathBuf,
    target_entry: String,
    verification: Verification,
}

impl VerifyResult {
    fn is_clean(&self) -> bool {
        self.verification == Verification::Remaining(0)
    }
}

/// Count what is left of the search pattern in already patched containers.
pub fn verify_containers(args: VerifyContainersArgs) -> Result<()> {
    let settings = resolve_job(&args.pattern, None, None)?;
    let search = settings.require_search()?;
    let files = existing_files(&args.files)?;

    let results: Vec<VerifyResult> = files
        .into_iter()
        .map(|container| VerifyResult {
            verification: verify(&container, &settings.entry, search),
            target_entry: settings.entry.clone(),
            container,
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results).into_diagnostic()?);
    } else {
        println!(
            "{} {} {}",
            "🔍 Verifying".bright_blue().bold(),
            settings.entry.bright_white(),
            describe_bytes(search).bright_yellow()
        );
        for result in &results {
            let mark = if result.is_clean() {
                "✓".bright_green().bold()
            } else {
                "✗".bright_red().bold()
            };
            println_pad!(
                "{} {} {}",
                mark,
                file_name(&result.container),
                describe_verification(&result.verification)
            );
        }
    }

    let failed = results.iter().filter(|result| !result.is_clean()).count();
    if args.strict && failed > 0 {
        return Err(CliError::verification_failed(failed, results.len()).into());
    }

    Ok(())
}
