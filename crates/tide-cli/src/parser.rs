//! Command-line and environment configuration for the host.
//!
//! Every option can also be set through a `TIDE_VLLM_*` environment
//! variable (a `.env` file is loaded first by `main`).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tide_core::VllmConfig;
use tide_core::config::{DEFAULT_MODEL, DEFAULT_VLLM_PORT};

/// Host service backed by a supervised vLLM server.
#[derive(Debug, Parser)]
#[command(name = "tide-vllm")]
#[command(about = "Run a host service backed by a supervised vLLM server")]
#[command(version)]
pub struct Cli {
    /// Address of the host's own health endpoint
    #[arg(long, env = "TIDE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Seconds between background health checks of the backend
    #[arg(
        long,
        env = "TIDE_HEALTH_INTERVAL_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub health_interval_secs: u64,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Use the vLLM backend at all
    #[arg(long, env = "TIDE_VLLM_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub enabled: bool,

    /// Spawn and supervise `vllm serve`; otherwise an external server is expected
    #[arg(long, env = "TIDE_VLLM_AUTO_START", default_value_t = true, action = ArgAction::Set)]
    pub auto_start: bool,

    /// vLLM executable (looked up on PATH)
    #[arg(long, env = "TIDE_VLLM_PROGRAM", default_value = "vllm")]
    pub program: PathBuf,

    #[arg(long, env = "TIDE_VLLM_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "TIDE_VLLM_PORT", default_value_t = DEFAULT_VLLM_PORT)]
    pub port: u16,

    /// API key required by the server (and sent by readiness checks)
    #[arg(long, env = "TIDE_VLLM_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Served model name; readiness waits for it in `/v1/models`
    #[arg(long, env = "TIDE_VLLM_MODEL_NAME", default_value = DEFAULT_MODEL)]
    pub model_name: String,

    /// Local model path or Hugging Face id (defaults to the model name)
    #[arg(long, env = "TIDE_VLLM_MODEL_PATH")]
    pub model_path: Option<String>,

    #[arg(long, env = "TIDE_VLLM_GPU_MEMORY_UTILIZATION", default_value_t = 0.9)]
    pub gpu_memory_utilization: f64,

    #[arg(long, env = "TIDE_VLLM_TENSOR_PARALLEL_SIZE", default_value_t = 1)]
    pub tensor_parallel_size: u32,

    #[arg(long, env = "TIDE_VLLM_MAX_NUM_SEQS", default_value_t = 256)]
    pub max_num_seqs: u32,

    #[arg(long, env = "TIDE_VLLM_MAX_NUM_BATCHED_TOKENS", default_value_t = 8192)]
    pub max_num_batched_tokens: u32,

    #[arg(long, env = "TIDE_VLLM_MAX_MODEL_LEN", default_value_t = 4096)]
    pub max_model_len: u32,

    /// auto, float16, bfloat16 or float32
    #[arg(long, env = "TIDE_VLLM_DTYPE", default_value = "auto")]
    pub dtype: String,

    #[arg(long, env = "TIDE_VLLM_ENABLE_PREFIX_CACHING", default_value_t = true, action = ArgAction::Set)]
    pub enable_prefix_caching: bool,

    #[arg(long, env = "TIDE_VLLM_ENABLE_CHUNKED_PREFILL", default_value_t = true, action = ArgAction::Set)]
    pub enable_chunked_prefill: bool,

    /// Seconds to wait for the model to load
    #[arg(long, env = "TIDE_VLLM_STARTUP_TIMEOUT_SECS", default_value_t = 600)]
    pub startup_timeout_secs: u64,

    /// Seconds between SIGTERM and SIGKILL on shutdown
    #[arg(long, env = "TIDE_VLLM_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Extra arguments passed verbatim to `vllm serve` (after `--`)
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}

impl Cli {
    /// Backend settings described by these arguments.
    pub fn vllm_config(&self) -> VllmConfig {
        VllmConfig {
            enabled: self.enabled,
            auto_start: self.auto_start,
            program: self.program.clone(),
            host: self.host.clone(),
            port: self.port,
            api_key: self.api_key.clone(),
            model_name: self.model_name.clone(),
            model_path: self
                .model_path
                .clone()
                .unwrap_or_else(|| self.model_name.clone()),
            gpu_memory_utilization: self.gpu_memory_utilization,
            tensor_parallel_size: self.tensor_parallel_size,
            max_num_seqs: self.max_num_seqs,
            max_num_batched_tokens: self.max_num_batched_tokens,
            max_model_len: self.max_model_len,
            dtype: self.dtype.clone(),
            enable_prefix_caching: self.enable_prefix_caching,
            enable_chunked_prefill: self.enable_chunked_prefill,
            extra_args: self.extra_args.clone(),
            startup_timeout_secs: self.startup_timeout_secs,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_match_backend_defaults() {
        let cli = Cli::parse_from(["tide-vllm"]);
        let config = cli.vllm_config();
        let defaults = VllmConfig::default();

        assert!(config.enabled);
        assert!(config.auto_start);
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.model_name, defaults.model_name);
        assert_eq!(config.model_path, defaults.model_path);
        assert_eq!(config.serve_args(), defaults.serve_args());
        assert_eq!(cli.listen, "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_overrides_and_extra_args() {
        let cli = Cli::parse_from([
            "tide-vllm",
            "--verbose",
            "--port",
            "9000",
            "--model-name",
            "demo-model",
            "--model-path",
            "/models/demo",
            "--auto-start",
            "false",
            "--enable-prefix-caching",
            "false",
            "--",
            "--trust-remote-code",
        ]);
        assert!(cli.verbose);

        let config = cli.vllm_config();
        assert!(!config.auto_start);
        assert_eq!(config.port, 9000);
        assert_eq!(config.model_path, "/models/demo");

        let args = config.serve_args();
        assert_eq!(args[1], "/models/demo");
        assert!(!args.contains(&"--enable-prefix-caching".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--trust-remote-code"));
    }

    #[test]
    fn test_model_path_defaults_to_name() {
        let cli = Cli::parse_from(["tide-vllm", "--model-name", "org/model"]);
        assert_eq!(cli.vllm_config().model_path, "org/model");
    }

    #[test]
    fn test_zero_health_interval_rejected() {
        assert!(Cli::try_parse_from(["tide-vllm", "--health-interval-secs", "0"]).is_err());
    }
}
