//! CLI error presentation.

use colored::Colorize;

/// Print an error chain in a user-friendly way.
pub fn print_error(error: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);
    for cause in error.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
    }
}
