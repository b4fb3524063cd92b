//! Type-safe arguments for the privileged OS toolset.
//!
//! Each struct maps Rust fields to the exact flags the tool expects and
//! implements `ToolArgs` to produce an `Operation`. Stages build these
//! instead of formatting command strings, so a misplaced flag shows up in a
//! unit test here rather than as a failed `parted` on a real disk.

pub mod disk;
pub mod encryption;
pub mod portage;
pub mod system;
