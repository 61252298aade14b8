use camino::Utf8PathBuf;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use vba_sanitize_core::{
    PatchProgress, PatchReport, RestoreOutcome, SanitizeOptions, Transaction, TransactionState,
    Verification, ZipCodec,
};

use super::{existing_files, file_name, stage_label, validate_compression_level};
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::job::{resolve_job, PatternOpts, ReplaceOpts};
use crate::utils::{describe_bytes, print_ansi_boxed_lines};

#[derive(Debug)]
pub struct PatchContainersArgs {
    pub files: Vec<String>,
    pub pattern: PatternOpts,
    pub replace: ReplaceOpts,
    pub compression_level: Option<i64>,
    pub staging_dir: Option<String>,
    pub strict: bool,
    pub json: bool,
}

pub fn patch_containers(args: PatchContainersArgs) -> Result<()> {
    let settings = resolve_job(&args.pattern, Some(&args.replace), args.compression_level)?;
    validate_compression_level(settings.compression_level)?;
    let patch = settings.require_patch()?;
    let files = existing_files(&args.files)?;

    let staging_root = match &args.staging_dir {
        Some(dir) => {
            let dir = Utf8PathBuf::from(dir);
            if !dir.is_dir() {
                return Err(CliError::file_not_found(dir).into());
            }
            Some(dir)
        }
        None => None,
    };

    let codec = ZipCodec::new()
        .with_compression_level(settings.compression_level)
        .with_staging_root(staging_root);

    if !args.json {
        println!(
            "{} {} {} {} {}",
            "🩹 Patching".bright_blue().bold(),
            settings.entry.bright_white(),
            describe_bytes(patch.search()).bright_yellow(),
            "→".dimmed(),
            describe_bytes(patch.replacement()).bright_green()
        );
        if let Some(job_file) = &settings.job_file {
            println_pad!("{} {}", "Job file:".dimmed(), job_file);
        }
        warn_about_patch(patch.reintroduces_search(), patch.size_delta_per_match());
        println!();
    }

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let options = SanitizeOptions::new(patch.clone()).with_target_entry(&settings.entry);
        let mut transaction = Transaction::new(file, options).with_codec(codec.clone());
        if !args.json {
            transaction = transaction.with_progress(print_progress);
        }

        let report = transaction.run().map_err(CliError::from)?;
        if !args.json {
            print_report(&report);
        }

        if let Some(RestoreOutcome::RestoreFailed(reason)) = report.restore() {
            return Err(CliError::restore_failed(report.container.clone(), reason.clone()).into());
        }
        reports.push(report);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports).into_diagnostic()?);
    } else {
        print_summary(&reports);
    }

    let failed = reports.iter().filter(|report| !report.is_success()).count();
    if args.strict && failed > 0 {
        return Err(CliError::verification_failed(failed, reports.len()).into());
    }

    Ok(())
}

fn warn_about_patch(reintroduces_search: bool, size_delta: i64) {
    if reintroduces_search {
        println_pad!(
            "{} {}",
            "⚠".bright_yellow(),
            "The replacement contains the search pattern; occurrences will remain after patching"
                .bright_yellow()
        );
    }
    if size_delta != 0 {
        println_pad!(
            "{} {}",
            "⚠".bright_yellow(),
            format!(
                "Each replacement changes the macro project size by {:+} byte(s); Office may refuse to load it",
                size_delta
            )
            .bright_yellow()
        );
    }
}

fn print_progress(progress: PatchProgress) {
    if progress.state.is_terminal() {
        return;
    }
    tracing::debug!("{}: {:?}", progress.container, progress.state);
    println_pad!(
        "{} {}",
        "•".dimmed(),
        stage_label(progress.state.stage()).dimmed()
    );
}

fn print_report(report: &PatchReport) {
    match &report.state {
        TransactionState::Failed {
            stage,
            reason,
            restore,
        } => {
            println!(
                "{} {} {}",
                "✗".bright_red().bold(),
                file_name(&report.container),
                format!("failed after {}: {}", stage_label(*stage), reason).bright_red()
            );
            let restore = match restore {
                RestoreOutcome::NotNeeded => "original untouched".bright_green(),
                RestoreOutcome::Restored => "original restored from backup".bright_green(),
                RestoreOutcome::NoBackup => "no backup available".bright_yellow(),
                RestoreOutcome::RestoreFailed(reason) => {
                    format!("restore failed: {}", reason).bright_red().bold()
                }
            };
            println_pad!("{} {}", "Rollback:".bright_white(), restore);
        }
        _ => {
            let mark = if report.is_success() {
                "✓".bright_green().bold()
            } else {
                "!".bright_yellow().bold()
            };
            println!("{} {}", mark, file_name(&report.container));
            println_pad!(
                "{} {}",
                "Replaced:  ".bright_white(),
                report.replaced.to_string().bright_green()
            );
            println_pad!(
                "{} {}",
                "Remaining: ".bright_white(),
                describe_verification(&report.verification)
            );
            if let Some(delta) = report.size_delta() {
                println_pad!(
                    "{} {}",
                    "Size delta:".bright_white(),
                    format!("{:+} byte(s)", delta)
                );
            }
        }
    }
    println_pad!("{} {}", "Backup:    ".bright_white(), report.backup);
}

pub(crate) fn describe_verification(verification: &Verification) -> colored::ColoredString {
    match verification {
        Verification::Remaining(0) => "0".bright_green(),
        Verification::Remaining(count) => count.to_string().bright_red().bold(),
        Verification::EntryMissing => "target entry not found".bright_yellow(),
        Verification::Unavailable(reason) => format!("unavailable ({})", reason).bright_red(),
        Verification::Skipped => "skipped".dimmed(),
    }
}

fn print_summary(reports: &[PatchReport]) {
    let succeeded = reports.iter().filter(|report| report.is_success()).count();
    let failed = reports.iter().filter(|report| report.state.is_failed()).count();
    let incomplete = reports.len() - succeeded - failed;
    let replaced: usize = reports.iter().map(|report| report.replaced).sum();

    println!();
    let mut lines = vec![
        format!("{} {}", "Files:     ".bright_white(), reports.len()),
        format!(
            "{} {}",
            "Replaced:  ".bright_white(),
            replaced.to_string().bright_green()
        ),
        format!(
            "{} {}",
            "Clean:     ".bright_white(),
            succeeded.to_string().bright_green()
        ),
    ];
    if incomplete > 0 {
        lines.push(format!(
            "{} {}",
            "Incomplete:".bright_white(),
            incomplete.to_string().bright_yellow()
        ));
    }
    if failed > 0 {
        lines.push(format!(
            "{} {}",
            "Failed:    ".bright_white(),
            failed.to_string().bright_red()
        ));
    }
    print_ansi_boxed_lines(&lines);
}
