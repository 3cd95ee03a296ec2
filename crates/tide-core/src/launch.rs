//! Launch description for a supervised inference server.
//!
//! A [`LaunchSpec`] is intent-based: it says which executable to run, where
//! the server will listen and which model identifier must be advertised
//! before the server counts as ready. It is immutable once built.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::LaunchSpecError;

/// Default path of the model listing used for readiness checks.
pub const DEFAULT_READINESS_PATH: &str = "/v1/models";

/// Default startup timeout (model loading can take minutes).
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(600);

/// Default grace period between `SIGTERM` and `SIGKILL`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable description of how to start a child server and judge it ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    host: String,
    port: u16,
    scheme: String,
    readiness_path: String,
    readiness_id: String,
    api_key: Option<String>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
}

impl LaunchSpec {
    /// Start building a spec for `program` serving `readiness_id` on `host:port`.
    pub fn builder(
        program: impl Into<PathBuf>,
        host: impl Into<String>,
        port: u16,
        readiness_id: impl Into<String>,
    ) -> LaunchSpecBuilder {
        LaunchSpecBuilder::new(program.into(), host.into(), port, readiness_id.into())
    }

    /// Name used to tag log lines coming from the child.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Environment overlay applied on top of the inherited host environment.
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Model identifier that must appear in the listing before the server is ready.
    pub fn readiness_id(&self) -> &str {
        &self.readiness_id
    }

    /// Bearer token for the readiness query, if the server enforces one.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub const fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Full URL of the readiness endpoint, e.g. `http://localhost:8000/v1/models`.
    pub fn readiness_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme, self.host, self.port, self.readiness_path
        )
    }

    /// Human-readable command line, for logging only (never executed by a shell).
    ///
    /// The value following `--api-key` is masked.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push("***".to_string());
            } else {
                parts.push(arg.clone());
            }
            mask_next = arg == "--api-key";
        }
        parts.join(" ")
    }

    /// Check the invariants a supervisor relies on.
    pub fn validate(&self) -> Result<(), LaunchSpecError> {
        if self.program.as_os_str().is_empty() {
            return Err(LaunchSpecError::EmptyProgram);
        }
        if self.host.trim().is_empty() {
            return Err(LaunchSpecError::EmptyHost);
        }
        if self.port == 0 {
            return Err(LaunchSpecError::InvalidPort);
        }
        if self.readiness_id.trim().is_empty() {
            return Err(LaunchSpecError::EmptyReadinessId);
        }
        if !self.readiness_path.starts_with('/') {
            return Err(LaunchSpecError::InvalidReadinessPath(
                self.readiness_path.clone(),
            ));
        }
        if self.startup_timeout.is_zero() {
            return Err(LaunchSpecError::ZeroTimeout("startup"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(LaunchSpecError::ZeroTimeout("shutdown"));
        }
        Ok(())
    }
}

/// Builder for [`LaunchSpec`]; `build()` validates the result.
#[derive(Debug, Clone)]
pub struct LaunchSpecBuilder {
    spec: LaunchSpec,
}

impl LaunchSpecBuilder {
    fn new(program: PathBuf, host: String, port: u16, readiness_id: String) -> Self {
        let name = program
            .file_name()
            .map_or_else(|| "server".to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            spec: LaunchSpec {
                name,
                program,
                args: Vec::new(),
                working_dir: None,
                env: BTreeMap::new(),
                host,
                port,
                scheme: "http".to_string(),
                readiness_path: DEFAULT_READINESS_PATH.to_string(),
                readiness_id,
                api_key: None,
                startup_timeout: DEFAULT_STARTUP_TIMEOUT,
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.spec.scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn readiness_path(mut self, path: impl Into<String>) -> Self {
        self.spec.readiness_path = path.into();
        self
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.spec.api_key = (!key.is_empty()).then_some(key);
        self
    }

    #[must_use]
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.spec.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.spec.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<LaunchSpec, LaunchSpecError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}
