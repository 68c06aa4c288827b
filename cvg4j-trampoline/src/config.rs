//! Bridge configuration.
//!
//! Looked up in this order: the file named by `CVG4J_BRIDGE_CONFIG`, then
//! `<config dir>/cvg4j/bridge.toml`, then built-in defaults. `CVG4J_LOG` and
//! `CVG4J_LOG_JSON` override the log section afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CONFIG_ENV: &str = "CVG4J_BRIDGE_CONFIG";
pub const LOG_FILTER_ENV: &str = "CVG4J_LOG";
pub const LOG_JSON_ENV: &str = "CVG4J_LOG_JSON";

/// `JNI_VERSION_10`.
pub const DEFAULT_JNI_VERSION: i32 = 0x000a_0000;
pub const DEFAULT_THREAD_NAME: &str = "cvg4j-native-callback";
pub const DEFAULT_LOCAL_FRAME_CAPACITY: i32 = 16;

/// What happens to a native thread this bridge attached once it stops calling back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetachPolicy {
    /// Stay attached until the process exits. Native libraries reuse their
    /// threads, so re-attaching on every callback would be wasted work.
    #[default]
    Never,
    /// Detach when the native thread exits.
    OnThreadExit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive.
    pub filter: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "cvg4j=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub detach: DetachPolicy,
    /// Name given to native threads when they are attached. Empty means unnamed.
    pub thread_name: String,
    /// JNI version requested on attach.
    pub jni_version: i32,
    /// Print pending managed exceptions to stderr before clearing them.
    pub describe_exceptions: bool,
    /// Local reference capacity reserved for one callback's temporaries.
    pub local_frame_capacity: i32,
    pub log: LogConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            detach: DetachPolicy::Never,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            jni_version: DEFAULT_JNI_VERSION,
            describe_exceptions: true,
            local_frame_capacity: DEFAULT_LOCAL_FRAME_CAPACITY,
            log: LogConfig::default(),
        }
    }
}

fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cvg4j")
        .join("bridge.toml")
}

impl BridgeConfig {
    /// Load from the process environment. Never fails: a broken file is logged
    /// and the defaults are used, because the bridge has to come up regardless.
    pub fn load() -> Self {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// [`Self::load`] with an injectable environment lookup.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Self {
        let (config, problem) = Self::load_reporting_with(env);
        if let Some(e) = problem {
            tracing::warn!("{e}; using defaults");
        }
        config
    }

    /// Like [`Self::load`], but hands back a broken file's error instead of
    /// logging it, for callers that install a subscriber from the result.
    pub fn load_reporting() -> (Self, Option<Error>) {
        Self::load_reporting_with(|key| std::env::var(key).ok())
    }

    pub fn load_reporting_with(env: impl Fn(&str) -> Option<String>) -> (Self, Option<Error>) {
        let path = env(CONFIG_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_path);

        let (mut config, problem) = if path.exists() {
            match Self::from_file(&path) {
                Ok(c) => (c, None),
                Err(e) => (Self::default(), Some(e)),
            }
        } else {
            (Self::default(), None)
        };
        config.apply_env(env);
        (config, problem)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            Error::Config { reason, .. } => Error::Config {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            path: "<inline>".to_string(),
            reason: e.message().to_string(),
        })
    }

    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(filter) = env(LOG_FILTER_ENV).filter(|f| !f.is_empty()) {
            self.log.filter = filter;
        }
        if let Some(json) = env(LOG_JSON_ENV) {
            self.log.json = json == "1";
        }
    }

    /// Thread name to attach with, if any.
    pub fn attach_name(&self) -> Option<&str> {
        Some(self.thread_name.as_str()).filter(|n| !n.is_empty())
    }
}
