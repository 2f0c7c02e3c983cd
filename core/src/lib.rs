//! Tool dispatch & policy core: path normalization, shell-command parsing,
//! TOCTOU-resistant file verification, protected-file detection, approval
//! gating, and subagent approval IPC for an interactive AI-agent CLI.

pub mod allowlist;
pub mod approval_channel;
pub mod approval_engine;
pub mod atomic_open;
pub mod batch_executor;
pub mod config;
pub mod error;
pub mod error_formatter;
pub mod gate_config;
pub mod path_normalize;
pub mod pattern_generator;
pub mod prompter;
pub mod protected_files;
pub mod rate_limiter;
pub mod shell_parser;
pub mod tool_registry;
pub mod types;
pub mod verified_file_context;

pub use error::RalphError;
pub use error::Result;
pub use error::VerifyError;
