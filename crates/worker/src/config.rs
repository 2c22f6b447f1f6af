use std::path::PathBuf;
use std::str::FromStr;

use reelsmith_cloud::S3Config;
use reelsmith_core::storage::DEFAULT_PRESIGN_EXPIRY_SECS;

/// Configuration errors detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which pipeline backend to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineBackend {
    /// Persistent worker process: `python script --model <path>`.
    Script { python: PathBuf, script: PathBuf },
    /// Random-colour video through ffmpeg; needs no model.
    Smoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Model resolution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub model_id: String,
    pub fallback_model_id: Option<String>,
    pub filename: String,
    pub search_paths: Vec<PathBuf>,
    pub registry_url: String,
    pub sha256: Option<String>,
    pub cache_dir: PathBuf,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Timeout of a `/runsync` request in seconds (default: `3600`).
    pub request_timeout_secs: u64,
    pub storage: S3Config,
    /// Key prefix directory for uploads (default: none).
    pub upload_prefix: String,
    /// Signed URL validity in seconds (default: `86400`).
    pub presign_expiry_secs: u64,
    pub model: ModelConfig,
    /// Directory for staged assets, settings snapshots and outputs.
    pub work_dir: PathBuf,
    pub backend: PipelineBackend,
    /// Endpoint receiving progress events, if any.
    pub progress_webhook_url: Option<String>,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                    | Default                                         |
    /// |----------------------------|-------------------------------------------------|
    /// | `HOST`                     | `0.0.0.0`                                       |
    /// | `PORT`                     | `8000`                                          |
    /// | `REQUEST_TIMEOUT_SECS`     | `3600`                                          |
    /// | `BUCKET_ENDPOINT_URL`      | required                                        |
    /// | `BUCKET_NAME`              | required                                        |
    /// | `BUCKET_ACCESS_KEY_ID`     | required                                        |
    /// | `BUCKET_SECRET_ACCESS_KEY` | required                                        |
    /// | `BUCKET_REGION`            | `us-east-1`                                     |
    /// | `UPLOAD_PREFIX`            | empty                                           |
    /// | `PRESIGN_EXPIRY_SECS`      | `86400`                                         |
    /// | `MODEL_ID`                 | `Lykon/dreamshaper-8`                           |
    /// | `MODEL_FALLBACK_ID`        | unset                                           |
    /// | `MODEL_FILENAME`           | `model.safetensors`                             |
    /// | `MODEL_SEARCH_PATHS`       | `/runpod-volume/models,/workspace/models,/models` |
    /// | `MODEL_REGISTRY_URL`       | `https://huggingface.co`                        |
    /// | `MODEL_SHA256`             | unset                                           |
    /// | `CACHE_DIR`                | `/tmp/reelsmith/cache`                          |
    /// | `WORK_DIR`                 | system temp dir                                 |
    /// | `PIPELINE_BACKEND`         | `script` (`script` or `smoke`)                  |
    /// | `PIPELINE_PYTHON`          | `python3`                                       |
    /// | `PIPELINE_SCRIPT`          | `/app/deforum_worker.py`                        |
    /// | `PROGRESS_WEBHOOK_URL`     | unset                                           |
    /// | `LOG_FORMAT`               | `pretty` (`pretty` or `json`)                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let storage = S3Config {
            endpoint_url: env.required("BUCKET_ENDPOINT_URL")?,
            bucket: env.required("BUCKET_NAME")?,
            region: env.or("BUCKET_REGION", "us-east-1"),
            access_key_id: env.required("BUCKET_ACCESS_KEY_ID")?,
            secret_access_key: env.required("BUCKET_SECRET_ACCESS_KEY")?,
        };

        let model = ModelConfig {
            model_id: env.or("MODEL_ID", "Lykon/dreamshaper-8"),
            fallback_model_id: env.optional("MODEL_FALLBACK_ID"),
            filename: env.or("MODEL_FILENAME", "model.safetensors"),
            search_paths: env
                .or("MODEL_SEARCH_PATHS", "/runpod-volume/models,/workspace/models,/models")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            registry_url: env.or("MODEL_REGISTRY_URL", "https://huggingface.co"),
            sha256: env.optional("MODEL_SHA256"),
            cache_dir: PathBuf::from(env.or("CACHE_DIR", "/tmp/reelsmith/cache")),
        };

        let backend = match env.or("PIPELINE_BACKEND", "script").to_ascii_lowercase().as_str() {
            "script" => PipelineBackend::Script {
                python: PathBuf::from(env.or("PIPELINE_PYTHON", "python3")),
                script: PathBuf::from(env.or("PIPELINE_SCRIPT", "/app/deforum_worker.py")),
            },
            "smoke" => PipelineBackend::Smoke,
            other => {
                return Err(ConfigError::Invalid {
                    var: "PIPELINE_BACKEND",
                    value: other.to_string(),
                    reason: "expected `script` or `smoke`".into(),
                })
            }
        };

        let log_format = match env.or("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            host: env.or("HOST", "0.0.0.0"),
            port: env.parsed("PORT", 8000)?,
            request_timeout_secs: env.parsed("REQUEST_TIMEOUT_SECS", 3600)?,
            storage,
            upload_prefix: env.or("UPLOAD_PREFIX", ""),
            presign_expiry_secs: env.parsed("PRESIGN_EXPIRY_SECS", DEFAULT_PRESIGN_EXPIRY_SECS)?,
            model,
            work_dir: env
                .optional("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            backend,
            progress_webhook_url: env.optional("PROGRESS_WEBHOOK_URL"),
            log_format,
        })
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Non-blank value of `var`.
    fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or(&self, var: &str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }
}
