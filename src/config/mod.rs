use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

use crate::runtime::RuntimeConfig;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let mut cfg = Self::from_file(config_path);

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                cfg.inner.insert(k, v);
            }
        }

        cfg
    }

    /// Defaults overlaid with the `KEY=VALUE` lines of `config_path`, ignoring the environment.
    pub fn from_file(config_path: PathBuf) -> Self {
        let mut map = default_map();

        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
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

        Self { inner: map, config_path }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn python(&self) -> String {
        self.get("PYRUNNER_PYTHON").unwrap_or_else(|| "python3".into())
    }

    /// Per-call budget; `0` disables the timeout.
    pub fn timeout(&self) -> Option<Duration> {
        match self.get_u64("PYRUNNER_TIMEOUT_MS").unwrap_or(5_000) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.get_u64("PYRUNNER_STARTUP_TIMEOUT_MS").unwrap_or(15_000))
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.get_path("PYRUNNER_RUNTIME_DIR")
            .unwrap_or_else(default_runtime_dir)
    }

    pub fn test_store_path(&self) -> PathBuf {
        self.get_path("PYRUNNER_TEST_STORE_PATH")
            .unwrap_or_else(default_test_store_path)
    }

    pub fn max_trace_steps(&self) -> usize {
        self.get_usize("PYRUNNER_MAX_TRACE_STEPS").unwrap_or(1_000)
    }

    pub fn library_module(&self) -> String {
        self.get("PYRUNNER_LIBRARY_MODULE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "library".into())
    }

    pub fn owner(&self) -> String {
        self.get("PYRUNNER_OWNER").unwrap_or_else(|| "default".into())
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            python: self.python(),
            runtime_dir: self.runtime_dir(),
            startup_timeout: self.startup_timeout(),
            interrupts: self.get_bool("PYRUNNER_INTERRUPTS"),
        }
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "PYRUNNER_PYTHON",
        "PYRUNNER_TIMEOUT_MS",
        "PYRUNNER_STARTUP_TIMEOUT_MS",
        "PYRUNNER_INTERRUPTS",
        "PYRUNNER_RUNTIME_DIR",
        "PYRUNNER_TEST_STORE_PATH",
        "PYRUNNER_MAX_TRACE_STEPS",
        "PYRUNNER_LIBRARY_MODULE",
        "PYRUNNER_OWNER",
    ];

    KEYS.contains(&k)
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("pyrunner").join(".pyrunnerrc")
}

fn default_runtime_dir() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.cache_dir().to_path_buf())
        .unwrap_or_else(env::temp_dir)
        .join("pyrunner")
        .join("runtime")
}

fn default_test_store_path() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.data_local_dir().to_path_buf())
        .unwrap_or_else(env::temp_dir)
        .join("pyrunner")
        .join("tests")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Paths
    m.insert(
        "PYRUNNER_RUNTIME_DIR".into(),
        default_runtime_dir().to_string_lossy().into_owned(),
    );
    m.insert(
        "PYRUNNER_TEST_STORE_PATH".into(),
        default_test_store_path().to_string_lossy().into_owned(),
    );

    // Numbers
    m.insert("PYRUNNER_TIMEOUT_MS".into(), "5000".into());
    m.insert("PYRUNNER_STARTUP_TIMEOUT_MS".into(), "15000".into());
    m.insert("PYRUNNER_MAX_TRACE_STEPS".into(), "1000".into());

    // Strings
    m.insert("PYRUNNER_PYTHON".into(), "python3".into());
    m.insert("PYRUNNER_LIBRARY_MODULE".into(), "library".into());
    m.insert("PYRUNNER_OWNER".into(), "default".into());

    // Bools as strings
    m.insert("PYRUNNER_INTERRUPTS".into(), "true".into());

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".pyrunnerrc");
        fs::write(
            &path,
            "# comment\nPYRUNNER_TIMEOUT_MS = 250\n\nPYRUNNER_PYTHON=/opt/py/bin/python\n",
        )
        .unwrap();

        let cfg = Config::from_file(path);
        assert_eq!(cfg.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.python(), "/opt/py/bin/python");
        assert_eq!(cfg.max_trace_steps(), 1_000);
        assert!(cfg.get_bool("PYRUNNER_INTERRUPTS"));
    }

    #[test]
    fn zero_timeout_disables_budget() {
        let mut cfg = Config::from_file(PathBuf::from("/nonexistent/.pyrunnerrc"));
        cfg.set("PYRUNNER_TIMEOUT_MS", "0");
        assert_eq!(cfg.timeout(), None);
    }

    #[test]
    fn blank_library_module_falls_back() {
        let mut cfg = Config::from_file(PathBuf::from("/nonexistent/.pyrunnerrc"));
        cfg.set("PYRUNNER_LIBRARY_MODULE", "  ");
        assert_eq!(cfg.library_module(), "library");
    }
}
