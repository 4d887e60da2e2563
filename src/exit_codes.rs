// src/exit_codes.rs

//! Stable process exit codes for `provisor`.

/// Every module is installed (this run or a resumed one).
pub const OK: i32 = 0;
/// Invalid config, unreadable/unwritable checkpoint, refused resume, or any
/// other error before or outside the run itself.
pub const ERROR: i32 = 1;
/// The run completed but at least one module failed or was skipped because
/// a dependency failed.
pub const PARTIAL: i32 = 2;
/// A systemic failure aborted the run and triggered rollback.
pub const ABORTED: i32 = 3;
/// Stopped by Ctrl-C; the checkpoint is resumable.
pub const INTERRUPTED: i32 = 130;
