//! Show the effective configuration.

use keyroll_common::config::{config_file_path, AppConfig};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Keyroll Configuration Check");
    println!("{}", "=".repeat(50));

    let path = config_file_path();
    if path.exists() {
        println!("[OK] Config file: {}", path.display());
    } else {
        println!("[--] Config file: {} (not found, using defaults)", path.display());
    }

    match config.export.validate() {
        Ok(()) => println!("[OK] Export defaults are valid"),
        Err(e) => println!("[FAIL] {e}"),
    }
    println!("[--] Exports directory: {}", config.exports_dir.display());
    println!();

    println!("{}", serde_json::to_string_pretty(config)?);

    config.export.validate()?;
    Ok(())
}
