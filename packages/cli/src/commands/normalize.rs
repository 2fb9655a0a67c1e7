use anyhow::Result;
use clap::Args;
use colored::Colorize;
use trellis_expression::{is_expression, is_global, is_unbound};

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Expressions such as `{!v.items[0].label}`
    #[arg(required = true)]
    pub expressions: Vec<String>,
}

pub fn normalize(args: NormalizeArgs) -> Result<()> {
    for raw in &args.expressions {
        let normalized = trellis_expression::normalize(raw);
        println!("  {} → {} ({})", raw, normalized.bright_white(), describe(raw, &normalized));
    }
    Ok(())
}

fn describe(raw: &str, normalized: &str) -> colored::ColoredString {
    if !is_expression(raw) {
        "literal".dimmed()
    } else if is_global(normalized) {
        "global".cyan()
    } else if is_unbound(raw) {
        "unbound".yellow()
    } else {
        "bound".green()
    }
}
