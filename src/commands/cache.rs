//! Cache command handler
//!
//! Handles `bsweep cache` subcommands for the per-board incremental cache.
//!
//! - `bsweep cache stats` - Entry counts, sizes and example coverage per board
//! - `bsweep cache clean` - Drop cache entries (all, per board, or per example)

use anyhow::Result;
use colored::*;
use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::cache::{BuildCacheStore, TargetCacheStats};
use crate::config::SweepConfig;
use crate::ui::{self, Table};
use crate::unit::normalize_name;

/// Cache subcommand operations
#[derive(Clone, Debug)]
pub enum CacheOp {
    Stats,
    Clean {
        board: Option<String>,
        example: Option<String>,
    },
}

pub fn handle_cache_command(config: &SweepConfig, op: &CacheOp) -> Result<()> {
    let store = store_for(config);
    match op {
        CacheOp::Stats => show_stats(&store),
        CacheOp::Clean { board, example } => {
            clean_entries(config, &store, board.as_deref(), example.as_deref())
        }
    }
}

fn store_for(config: &SweepConfig) -> BuildCacheStore {
    BuildCacheStore::new(config.build_dir(), config.lib_dirs(), config.fingerprinter())
}

fn show_stats(store: &BuildCacheStore) -> Result<()> {
    let stats = store.stats()?;
    if stats.is_empty() {
        println!(
            "{} No build directories under {}",
            "ℹ".blue(),
            store.build_root().display()
        );
        return Ok(());
    }

    println!("{} {}", "📦".cyan(), "Build Cache".bold());
    println!("{}", "─".repeat(50).dimmed());
    stats_table(&stats, SystemTime::now()).print();

    let coverage = Coverage::from_stats(&stats);
    println!();
    for line in coverage.describe() {
        println!("   {line}");
    }
    Ok(())
}

pub fn stats_table(stats: &[TargetCacheStats], now: SystemTime) -> Table {
    let mut table = Table::new(&["Board", "Entries", "Size", "Updated", "Examples"]);
    for stat in stats {
        let row = match (&stat.file, &stat.error) {
            (Some(file), _) => vec![
                stat.target.clone(),
                file.entries.len().to_string(),
                format_size(file.size),
                file.modified
                    .and_then(|m| now.duration_since(m).ok())
                    .map(|age| format!("{} ago", ui::format_duration(age.as_secs_f64())))
                    .unwrap_or_else(|| "-".to_string()),
                file.entries
                    .iter()
                    .map(|(unit, files)| format!("{unit} ({files})"))
                    .collect::<Vec<_>>()
                    .join(", "),
            ],
            (None, Some(err)) => vec![
                stat.target.clone(),
                "-".into(),
                "-".into(),
                "-".into(),
                format!("unreadable: {err}"),
            ],
            (None, None) => vec![
                stat.target.clone(),
                "0".into(),
                "-".into(),
                "-".into(),
                "no cache file".into(),
            ],
        };
        table.add_row(row);
    }
    table
}

/// Which examples are cached on which boards.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Coverage {
    pub boards: usize,
    pub cached_boards: usize,
    pub entries: usize,
    /// Example name → number of boards with an entry for it.
    pub examples: BTreeMap<String, usize>,
}

impl Coverage {
    pub fn from_stats(stats: &[TargetCacheStats]) -> Self {
        let mut coverage = Coverage {
            boards: stats.len(),
            ..Coverage::default()
        };
        for file in stats.iter().filter_map(|s| s.file.as_ref()) {
            coverage.cached_boards += 1;
            coverage.entries += file.entries.len();
            for unit in file.entries.keys() {
                *coverage.examples.entry(unit.clone()).or_default() += 1;
            }
        }
        coverage
    }

    /// Examples cached on every board that has a cache file.
    pub fn everywhere(&self) -> Vec<&str> {
        self.examples
            .iter()
            .filter(|(_, n)| **n == self.cached_boards && self.cached_boards > 0)
            .map(|(unit, _)| unit.as_str())
            .collect()
    }

    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} of {} boards cached, {} entries, {} distinct examples",
            self.cached_boards,
            self.boards,
            self.entries,
            self.examples.len()
        )];
        let everywhere = self.everywhere();
        if !everywhere.is_empty() {
            lines.push(format!("Cached on every board: {}", everywhere.join(", ")));
        }
        let partial: Vec<String> = self
            .examples
            .iter()
            .filter(|(_, n)| **n < self.cached_boards)
            .map(|(unit, n)| format!("{unit} ({n}/{})", self.cached_boards))
            .collect();
        if !partial.is_empty() {
            lines.push(format!("Partially cached: {}", partial.join(", ")));
        }
        lines
    }
}

fn clean_entries(
    config: &SweepConfig,
    store: &BuildCacheStore,
    board: Option<&str>,
    example: Option<&str>,
) -> Result<()> {
    let example = example.map(normalize_name);
    match (board, example.as_deref()) {
        (None, None) => {
            let removed = store.clear_all()?;
            println!("{} Removed {} cache file(s)", "✓".green(), removed);
        }
        (Some(board), example) => {
            config.target(board)?;
            store.clear(board, example)?;
            match example {
                Some(example) => println!("{} Cleared {example} for {board}", "✓".green()),
                None => println!("{} Cleared cache for {board}", "✓".green()),
            }
        }
        (None, Some(example)) => {
            let mut cleared = 0;
            for stat in store.stats()? {
                if stat.file.as_ref().is_some_and(|f| f.entries.contains_key(example)) {
                    store.clear(&stat.target, Some(example))?;
                    cleared += 1;
                }
            }
            println!(
                "{} Cleared {example} from {cleared} board cache(s)",
                "✓".green()
            );
        }
    }
    Ok(())
}

/// `1536` → `"1.5 KB"`.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
