//! External build toolchain interface.
//!
//! The core never compiles anything itself. It asks a [`ToolchainInvoker`] to
//! initialize a board's project, compile one example, or dump project metadata,
//! and gets back a classified [`ToolOutput`]. [`PlatformIo`] is the real
//! implementation; tests substitute recording fakes.

pub mod metadata;
pub mod platformio;
pub mod process;
pub mod types;

pub use platformio::PlatformIo;
pub use process::{Echo, run_streamed};
pub use types::{
    CompileRequest, ExitKind, InitRequest, Invocation, OutputLine, Stage, Stream, ToolOutput,
};

use crate::error::Result;
use crate::config::Target;
use std::path::Path;

/// Operations the build core needs from a toolchain.
///
/// `Err` means the tool could not be launched at all. A tool that ran and
/// failed (or timed out) returns `Ok` with a non-success [`ExitKind`].
pub trait ToolchainInvoker: Send + Sync {
    /// (Re)generate the board's project configuration in `req.build_dir`.
    fn init_project(&self, req: &InitRequest<'_>) -> Result<ToolOutput>;

    /// Compile one example for one board.
    fn compile(&self, req: &CompileRequest<'_>) -> Result<ToolOutput>;

    /// Project metadata as JSON on stdout.
    fn metadata(&self, target: &Target, build_dir: &Path) -> Result<ToolOutput>;
}
