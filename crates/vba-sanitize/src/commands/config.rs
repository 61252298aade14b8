use crate::utils::config::{self, AppConfig};
use colored::Colorize;
use miette::Result;
use vba_sanitize_core::{TextEncoding, DEFAULT_TARGET_ENTRY};

use super::validate_compression_level;

fn update_config(apply: impl FnOnce(&mut AppConfig)) -> Result<()> {
    let mut cfg = config::load_config();
    apply(&mut cfg);
    config::save_config(&cfg).map_err(|e| miette::miette!("Failed to save config: {}", e))
}

fn print_setting(name: &str, value: Option<String>, fallback: &str) {
    match value {
        Some(value) => println!(
            "  {} {}",
            format!("{}:", name).bright_white(),
            value.bright_green()
        ),
        None => println!(
            "  {} {} {}",
            format!("{}:", name).bright_white(),
            fallback,
            "(default)".dimmed()
        ),
    }
}

pub fn show_config() -> Result<()> {
    let cfg = config::load_config();
    let config_path = config::default_config_path()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    println!();
    println!("  {} {}", "config_file:".bright_white(), config_path);
    print_setting(
        "default_entry",
        cfg.default_entry.clone(),
        DEFAULT_TARGET_ENTRY,
    );
    print_setting(
        "default_encoding",
        cfg.default_encoding.map(|encoding| encoding.to_string()),
        &TextEncoding::default().to_string(),
    );
    print_setting(
        "compression_level",
        cfg.compression_level.map(|level| level.to_string()),
        "library default",
    );
    println!();
    Ok(())
}

pub fn set_default_entry(entry: String) -> Result<()> {
    let entry = entry.trim().trim_start_matches('/').to_string();
    if entry.is_empty() {
        return Err(miette::miette!("The entry path must not be empty"));
    }

    update_config(|cfg| cfg.default_entry = Some(entry.clone()))?;
    println!("{}", "✓ Default entry set".bright_green().bold());
    println!("  {} {}", "Entry:".bright_white().bold(), entry.bright_green());
    Ok(())
}

pub fn set_default_encoding(encoding: TextEncoding) -> Result<()> {
    update_config(|cfg| cfg.default_encoding = Some(encoding))?;
    println!("{}", "✓ Default encoding set".bright_green().bold());
    println!(
        "  {} {}",
        "Encoding:".bright_white().bold(),
        encoding.to_string().bright_green()
    );
    Ok(())
}

pub fn set_compression_level(level: i64) -> Result<()> {
    validate_compression_level(Some(level))?;
    update_config(|cfg| cfg.compression_level = Some(level))?;
    println!("{}", "✓ Compression level set".bright_green().bold());
    println!(
        "  {} {}",
        "Level:".bright_white().bold(),
        level.to_string().bright_green()
    );
    Ok(())
}

pub fn reset_config() -> Result<()> {
    let config_path = config::default_config_path()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    config::save_config(&AppConfig::default())
        .map_err(|e| miette::miette!("Failed to reset config: {}", e))?;

    println!(
        "{}",
        "✓ Configuration reset to defaults".bright_green().bold()
    );
    println!();
    println!("  {} {}", "Config file:".bright_white().bold(), config_path);
    println!();
    Ok(())
}
