use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    info_container, patch_containers, verify_containers, InfoContainerArgs, PatchContainersArgs,
    VerifyContainersArgs,
};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utils::job::{PatternOpts, ReplaceOpts};
use vba_sanitize_core::TextEncoding;

mod commands;
mod errors;
mod utils;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Log every step of the transaction to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replace a byte pattern inside the macro project of one or more containers
    Patch {
        /// The containers to patch (.xlsm, .docm, .pptm, ...)
        #[arg(required = true)]
        files: Vec<String>,

        #[command(flatten)]
        pattern: PatternOpts,

        #[command(flatten)]
        replace: ReplaceOpts,

        /// Deflate level used when repacking (0-9)
        #[arg(long)]
        compression_level: Option<i64>,

        /// Directory to extract containers into (defaults to the system temp dir)
        #[arg(long)]
        staging_dir: Option<String>,

        /// Exit with an error unless every file ends up clean
        #[arg(long)]
        strict: bool,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count remaining occurrences of a byte pattern without modifying anything
    Verify {
        /// The containers to check
        #[arg(required = true)]
        files: Vec<String>,

        #[command(flatten)]
        pattern: PatternOpts,

        /// Exit with an error unless every file is clean
        #[arg(long)]
        strict: bool,

        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the entries of a container and count a pattern in its macro project
    Info {
        /// The container to inspect
        file: String,

        #[command(flatten)]
        pattern: PatternOpts,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the defaults stored in config.toml
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the current configuration
    Show,
    /// Set the archive path patched when no --entry is given
    SetEntry {
        /// Archive path of the macro project, e.g. word/vbaProject.bin
        entry: String,
    },
    /// Set the encoding used for textual patterns
    SetEncoding {
        /// utf-8 or latin-1
        encoding: TextEncoding,
    },
    /// Set the deflate level used when repacking
    SetCompressionLevel {
        /// 0 (store fastest) to 9 (smallest)
        level: i64,
    },
    /// Reset the configuration to defaults
    Reset,
}

fn parse_args() -> Args {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "vba_sanitize=debug,vba_sanitize_core=debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let args = parse_args();
    init_logging(args.verbose);

    match args.command {
        Commands::Patch {
            files,
            pattern,
            replace,
            compression_level,
            staging_dir,
            strict,
            json,
        } => patch_containers(PatchContainersArgs {
            files,
            pattern,
            replace,
            compression_level,
            staging_dir,
            strict,
            json,
        }),
        Commands::Verify {
            files,
            pattern,
            strict,
            json,
        } => verify_containers(VerifyContainersArgs {
            files,
            pattern,
            strict,
            json,
        }),
        Commands::Info {
            file,
            pattern,
            json,
        } => info_container(InfoContainerArgs {
            file,
            pattern,
            json,
        }),
        Commands::Config { action } => match action {
            None | Some(ConfigAction::Show) => commands::show_config(),
            Some(ConfigAction::SetEntry { entry }) => commands::set_default_entry(entry),
            Some(ConfigAction::SetEncoding { encoding }) => {
                commands::set_default_encoding(encoding)
            }
            Some(ConfigAction::SetCompressionLevel { level }) => {
                commands::set_compression_level(level)
            }
            Some(ConfigAction::Reset) => commands::reset_config(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_patch_with_hex_patterns() {
        let args = Args::try_parse_from([
            "vba-sanitize",
            "patch",
            "a.xlsm",
            "b.xlsm",
            "--search-hex",
            "51424953",
            "--replace",
            "ERPSystem",
            "--strict",
        ])
        .unwrap();

        match args.command {
            Commands::Patch {
                files,
                pattern,
                replace,
                strict,
                json,
                ..
            } => {
                assert_eq!(files, ["a.xlsm", "b.xlsm"]);
                assert_eq!(pattern.search_hex.as_deref(), Some("51424953"));
                assert_eq!(replace.replace.as_deref(), Some("ERPSystem"));
                assert!(strict);
                assert!(!json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn text_and_hex_search_conflict() {
        let result = Args::try_parse_from([
            "vba-sanitize",
            "verify",
            "a.xlsm",
            "--search",
            "QBIS",
            "--search-hex",
            "51",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_encoding_values() {
        let args = Args::try_parse_from([
            "vba-sanitize",
            "info",
            "a.xlsm",
            "--encoding",
            "latin-1",
        ])
        .unwrap();

        match args.command {
            Commands::Info { pattern, .. } => {
                assert_eq!(pattern.encoding, Some(TextEncoding::Latin1))
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Args::try_parse_from([
            "vba-sanitize",
            "config",
            "set-encoding",
            "ebcdic"
        ])
        .is_err());
    }
}
