//! Build directory cleanup.
//!
//! This module provides the `bsweep clean` command for removing build outputs.
//!
//! ## Options
//!
//! - `bsweep clean` - Remove every board's build directory
//! - `bsweep clean --board uno` - Remove only the named boards' directories
//! - `bsweep clean --artifacts` - Also clear the shared compiled-artifact cache

use anyhow::{Context, Result};
use colored::*;

use super::remove::{Removal, robust_remove};
use crate::config::SweepConfig;
use std::path::Path;

pub fn clean(config: &SweepConfig, boards: &[String], artifacts: bool) -> Result<()> {
    let mut cleaned = false;
    let build_root = config.build_dir();

    // 1. Build directories
    if boards.is_empty() {
        cleaned |= remove_reported(&build_root)?;
    } else {
        for board in boards {
            config.target(board)?;
            cleaned |= remove_reported(&build_root.join(board))?;
        }
    }

    // 2. Shared artifact cache (outside the project)
    if artifacts {
        let cache_dir = config.artifact_cache_dir();
        if remove_reported(&cache_dir)? {
            cleaned = true;
        } else {
            println!("{} Artifact cache not found or already empty.", "!".yellow());
        }
    }

    if cleaned {
        println!("{} Clean complete.", "✓".green());
    } else {
        println!("{} Nothing to clean", "!".yellow());
    }
    Ok(())
}

fn remove_reported(path: &Path) -> Result<bool> {
    match robust_remove(path).with_context(|| format!("Failed to remove {}", path.display()))? {
        Removal::Removed => {
            println!("{} Removed {}", "✓".green(), path.display());
            Ok(true)
        }
        Removal::AlreadyGone => Ok(false),
    }
}
