//! Host binary for a supervised vLLM backend.
//!
//! - `parser` - clap definition of flags and `TIDE_VLLM_*` environment
//! - `host` - startup, health/log endpoints and shutdown

pub mod host;
pub mod parser;

pub use host::{AppState, Backend, router, run};
pub use parser::Cli;
