//! vLLM backend settings.
//!
//! Pure domain type: it knows how to turn itself into a `vllm serve`
//! command line and a [`LaunchSpec`], nothing else.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LaunchSpecError;
use crate::launch::LaunchSpec;

/// Default port `vllm serve` listens on.
pub const DEFAULT_VLLM_PORT: u16 = 8000;

/// Default model served (and expected in the readiness listing).
pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-7B-Instruct";

/// Settings for the vLLM backend.
///
/// Server launch knobs only matter when `auto_start` is set; otherwise the
/// host assumes a vLLM server is already running at `host:port`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VllmConfig {
    /// Whether the backend is used at all.
    pub enabled: bool,
    /// Spawn and supervise `vllm serve` at host startup.
    pub auto_start: bool,

    /// Executable to launch (resolved on `PATH` unless it is a path).
    pub program: PathBuf,
    pub host: String,
    pub port: u16,
    /// Passed to the server as `--api-key` and sent as bearer token by probes.
    pub api_key: String,

    /// Served model name; readiness waits for this id in `/v1/models`.
    pub model_name: String,
    /// Local path or Hugging Face model id.
    pub model_path: String,

    pub gpu_memory_utilization: f64,
    pub tensor_parallel_size: u32,
    pub max_num_seqs: u32,
    pub max_num_batched_tokens: u32,
    pub max_model_len: u32,
    /// `auto`, `float16`, `bfloat16` or `float32`.
    pub dtype: String,
    pub enable_prefix_caching: bool,
    pub enable_chunked_prefill: bool,
    /// Appended verbatim after the generated arguments.
    pub extra_args: Vec<String>,

    pub startup_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for VllmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_start: false,
            program: PathBuf::from("vllm"),
            host: "localhost".to_string(),
            port: DEFAULT_VLLM_PORT,
            api_key: String::new(),
            model_name: DEFAULT_MODEL.to_string(),
            model_path: DEFAULT_MODEL.to_string(),
            gpu_memory_utilization: 0.9,
            tensor_parallel_size: 1,
            max_num_seqs: 256,
            max_num_batched_tokens: 8192,
            max_model_len: 4096,
            dtype: "auto".to_string(),
            enable_prefix_caching: true,
            enable_chunked_prefill: true,
            extra_args: Vec::new(),
            startup_timeout_secs: 600,
            shutdown_timeout_secs: 10,
        }
    }
}

impl VllmConfig {
    /// Build the `vllm serve` argument list (program excluded).
    ///
    /// The order is fixed so the same config always yields the same command.
    pub fn serve_args(&self) -> Vec<String> {
        let mut args = vec![
            "serve".to_string(),
            self.model_path.clone(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--served-model-name".to_string(),
            self.model_name.clone(),
            "--gpu-memory-utilization".to_string(),
            self.gpu_memory_utilization.to_string(),
            "--max-num-batched-tokens".to_string(),
            self.max_num_batched_tokens.to_string(),
            "--max-num-seqs".to_string(),
            self.max_num_seqs.to_string(),
            "--max-model-len".to_string(),
            self.max_model_len.to_string(),
            "--tensor-parallel-size".to_string(),
            self.tensor_parallel_size.to_string(),
        ];

        if !self.dtype.is_empty() && self.dtype != "auto" {
            args.push("--dtype".to_string());
            args.push(self.dtype.clone());
        }
        if self.enable_prefix_caching {
            args.push("--enable-prefix-caching".to_string());
        }
        if self.enable_chunked_prefill {
            args.push("--enable-chunked-prefill".to_string());
        }
        if !self.api_key.is_empty() {
            args.push("--api-key".to_string());
            args.push(self.api_key.clone());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Convert into a validated [`LaunchSpec`] for the supervisor.
    pub fn to_launch_spec(&self) -> Result<LaunchSpec, LaunchSpecError> {
        LaunchSpec::builder(
            self.program.clone(),
            self.host.clone(),
            self.port,
            self.model_name.clone(),
        )
        .name("vLLM")
        .args(self.serve_args())
        .api_key(self.api_key.clone())
        .startup_timeout(Duration::from_secs(self.startup_timeout_secs))
        .shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_serve_args() {
        let config = VllmConfig::default();
        let args = config.serve_args();
        assert_eq!(
            args,
            [
                "serve",
                DEFAULT_MODEL,
                "--host",
                "localhost",
                "--port",
                "8000",
                "--served-model-name",
                DEFAULT_MODEL,
                "--gpu-memory-utilization",
                "0.9",
                "--max-num-batched-tokens",
                "8192",
                "--max-num-seqs",
                "256",
                "--max-model-len",
                "4096",
                "--tensor-parallel-size",
                "1",
                "--enable-prefix-caching",
                "--enable-chunked-prefill",
            ]
        );
    }

    #[test]
    fn test_optional_flags() {
        let config = VllmConfig {
            dtype: "bfloat16".to_string(),
            enable_prefix_caching: false,
            enable_chunked_prefill: false,
            api_key: "token".to_string(),
            extra_args: vec!["--trust-remote-code".to_string()],
            ..VllmConfig::default()
        };
        let args = config.serve_args();
        let tail = &args[args.len() - 5..];
        assert_eq!(
            tail,
            ["--dtype", "bfloat16", "--api-key", "token", "--trust-remote-code"]
        );
        assert!(!args.contains(&"--enable-prefix-caching".to_string()));
    }

    #[test]
    fn test_to_launch_spec() {
        let config = VllmConfig {
            port: 8123,
            model_name: "demo-model".to_string(),
            startup_timeout_secs: 5,
            ..VllmConfig::default()
        };
        let spec = config.to_launch_spec().unwrap();
        assert_eq!(spec.name(), "vLLM");
        assert_eq!(spec.readiness_id(), "demo-model");
        assert_eq!(spec.readiness_url(), "http://localhost:8123/v1/models");
        assert_eq!(spec.startup_timeout(), Duration::from_secs(5));
        assert_eq!(spec.args()[0], "serve");
    }

    #[test]
    fn test_to_launch_spec_rejects_empty_model_name() {
        let config = VllmConfig {
            model_name: String::new(),
            ..VllmConfig::default()
        };
        assert_eq!(
            config.to_launch_spec().unwrap_err(),
            LaunchSpecError::EmptyReadinessId
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: VllmConfig =
            serde_json::from_str(r#"{"enabled": true, "port": 9000}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.port, 9000);
        assert_eq!(config.model_name, DEFAULT_MODEL);
    }
}
