use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

use crate::error::{Error, Result};

/// Key/value configuration merged from defaults, the rc file and the
/// process environment (environment wins).
#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(default_config_path())
    }

    pub fn load_from(config_path: PathBuf) -> Self {
        let mut map = default_map();

        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(|l| l.ok()) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    /// Resolve the connection settings the pipeline consumes. The base URL
    /// is mandatory; everything else has defaults.
    pub fn connection_settings(&self) -> Result<ConnectionSettings> {
        let base_url = self
            .get("KERNELQ_BASE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "missing KERNELQ_BASE_URL; set it in env or {}",
                    self.config_path.display()
                ))
            })?;
        Ok(ConnectionSettings {
            base_url,
            token: self.get("KERNELQ_TOKEN").unwrap_or_default(),
            request_timeout: Duration::from_secs(self.get_u64("REQUEST_TIMEOUT").unwrap_or(60)),
            execute_timeout: match self.get_u64("EXECUTE_TIMEOUT").unwrap_or(300) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        })
    }
}

/// Resolved connection parameters consumed by [`crate::kernel::SessionClient`]
/// and [`crate::channel::ExecutionChannel`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Control-plane base endpoint, e.g. `http://localhost:8888/api`.
    pub base_url: String,
    /// Bearer token; empty means unauthenticated.
    pub token: String,
    /// Timeout for control-plane HTTP calls.
    pub request_timeout: Duration,
    /// Deadline per socket await; `None` waits indefinitely.
    pub execute_timeout: Option<Duration>,
}

impl ConnectionSettings {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            request_timeout: Duration::from_secs(60),
            execute_timeout: Some(Duration::from_secs(300)),
        }
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &["REQUEST_TIMEOUT", "EXECUTE_TIMEOUT"];
    KEYS.contains(&k) || k.starts_with("KERNELQ_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("kernelq").join(".kernelqrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("EXECUTE_TIMEOUT".into(), "300".into());
    m
}
