//! Board command handler
//!
//! Handles `bsweep boards` and interactive board selection for `bsweep build -i`.

use anyhow::{Result, bail};
use colored::*;
use inquire::MultiSelect;

use crate::config::{SweepConfig, Target};
use crate::ui::Table;

pub const NO_INTERACTIVE_ENV: &str = "BOARDSWEEP_NO_INTERACTIVE";

pub fn list_boards(config: &SweepConfig) -> Result<()> {
    if config.board.is_empty() {
        println!(
            "{} No boards configured. Add a {} table to sweep.toml.",
            "!".yellow(),
            "[board.<name>]".cyan()
        );
        return Ok(());
    }

    println!("{} {}", "🎯".cyan(), "Configured Boards".bold());
    println!("{}", "─".repeat(50).dimmed());
    let targets = config.targets(&config.board_names())?;
    board_table(&targets, &config.project.default_boards).print();
    println!();
    println!(
        "   Build a subset with {}.",
        "bsweep build --boards uno,esp32dev".cyan()
    );
    Ok(())
}

pub fn board_table(targets: &[Target], defaults: &[String]) -> Table {
    let mut table = Table::new(&["Board", "Id", "Platform", "Mode", "Defines"]);
    for target in targets {
        let name = if defaults.contains(&target.name) {
            format!("{} *", target.name)
        } else {
            target.name.clone()
        };
        table.add_row(vec![
            name,
            target.board.clone(),
            target.platform.clone().unwrap_or_else(|| "-".into()),
            if target.project_mode { "project" } else { "ci" }.to_string(),
            if target.defines.is_empty() {
                "-".into()
            } else {
                target.defines.join(" ")
            },
        ]);
    }
    table
}

/// Interactive prompts are refused when the environment disables them.
pub fn interactive_allowed(env: impl Fn(&str) -> Option<String>) -> bool {
    !env(NO_INTERACTIVE_ENV).is_some_and(|v| {
        let v = v.trim().to_ascii_lowercase();
        v == "1" || v == "true" || v == "yes"
    })
}

/// Let the user pick boards from the catalog, with the defaults preselected.
pub fn select_boards(config: &SweepConfig) -> Result<Vec<String>> {
    if !interactive_allowed(|k| std::env::var(k).ok()) {
        bail!("Interactive selection is disabled ({NO_INTERACTIVE_ENV} is set); pass --boards instead");
    }
    let names = config.board_names();
    if names.is_empty() {
        bail!("No boards configured in sweep.toml");
    }
    let preselected: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| config.project.default_boards.contains(n))
        .map(|(i, _)| i)
        .collect();

    let chosen = MultiSelect::new("Select boards to build:", names)
        .with_default(&preselected)
        .with_page_size(15)
        .prompt()?;
    if chosen.is_empty() {
        bail!("No boards selected");
    }
    Ok(chosen)
}
