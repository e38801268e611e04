//! # boardsweep - Multi-board compile orchestrator for embedded libraries
//!
//! boardsweep compiles one embedded library's examples against many boards by
//! driving PlatformIO, one subprocess per (board, example) pair.
//!
//! ## Features
//!
//! - **Incremental Rebuilds**: Content-hashed examples, rebuilt only when they change
//! - **Two-Stage Builds**: One seed build per board, then batch builds reusing its objects
//! - **Parallel Boards**: A bounded worker pool with fail-fast cancellation
//! - **Robust Cleanup**: Retried removal for shared, racy build directories
//!
//! ## Quick Start
//!
//! ```bash
//! # Build Blink for two boards
//! bsweep build Blink --boards uno,esp32dev
//!
//! # Inspect the incremental cache
//! bsweep cache stats
//! ```
//!
//! ## Module Organization
//!
//! - [`fingerprint`] - Content hashing of example trees
//! - [`cache`] - Per-board incremental build cache (`build_cache.json`)
//! - [`build`] - Build directories, two-stage sequencing and the orchestrator
//! - [`toolchain`] - PlatformIO invocation and output streaming
//! - [`commands`] - CLI command handlers

/// Build directories, sequencing and scheduling.
pub mod build;

/// Per-board incremental build cache.
pub mod cache;

/// CLI command handlers extracted from main.
pub mod commands;

/// Configuration file parsing (`sweep.toml`).
pub mod config;

/// Error types for the build core.
pub mod error;

/// Content fingerprints of example trees.
pub mod fingerprint;

/// Diagnostic tracing setup.
pub mod logging;

/// Toolchain invocation.
pub mod toolchain;

/// Terminal UI utilities (tables, colors, progress).
pub mod ui;

/// Examples as build units.
pub mod unit;
