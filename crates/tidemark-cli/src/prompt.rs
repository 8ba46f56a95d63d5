use std::io::IsTerminal;

use anyhow::{Context, Result};
use dialoguer::Confirm;

/// Ask before touching the databases. Refuses outright when stdin is not a
/// terminal.
pub fn confirm(question: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        println!("Non-interactive environment detected.");
        println!("Pass --force or set `migrations.safe: true` in the config to continue.");
        return Ok(false);
    }

    Confirm::new()
        .with_prompt(question)
        .default(false)
        .interact()
        .context("confirmation cancelled")
}
