use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::Result;

/// Typed process-wide configuration. Read once at startup and shared
/// read-only across requests.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: String,

    /// End-to-end wall-clock bound for the fetch-launch-data flow.
    pub fetch_timeout: Duration,

    /// Append-only journal for unexpected failures.
    pub error_log_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bind_addr = env_str("TMA_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:5000".to_string());
        let fetch_timeout = Duration::from_secs(env_u64("TMA_FETCH_TIMEOUT_SECS").unwrap_or(20));
        let error_log_path =
            env_path("TMA_ERROR_LOG_PATH").unwrap_or_else(|| PathBuf::from("error.log"));

        Ok(Self {
            bind_addr,
            fetch_timeout,
            error_log_path,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}
