use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Video container extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v",
];

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7300";
const DEFAULT_UPLOAD_DIR: &str = "./data/uploads";
const DEFAULT_AUDIO_DIR: &str = "./data/audio";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_WORKER_CONCURRENCY: usize = 1;
const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETENTION_SECS: u64 = 3600;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub log_dir: String,
    pub max_file_size: u64,
    pub worker_concurrency: usize,
    pub task_timeout: Duration,
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub rate_limit_per_minute: u32,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.parse().expect("default listen addr"),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            audio_dir: PathBuf::from(DEFAULT_AUDIO_DIR),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

/// Reads a variable from the process environment first, then from .env.
fn env_var(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_var(key).map(|v| v.parse::<T>()) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            tracing::warn!("Invalid value for {}, using default", key);
            default
        }
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        Self {
            listen_addr: env_parsed("TRS_LISTEN_ADDR", defaults.listen_addr),
            upload_dir: env_var("TRS_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            audio_dir: env_var("TRS_AUDIO_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.audio_dir),
            log_dir: env_var("TRS_LOG_DIR").unwrap_or(defaults.log_dir),
            max_file_size: env_parsed("TRS_MAX_FILE_SIZE", defaults.max_file_size),
            worker_concurrency: env_parsed("TRS_WORKER_CONCURRENCY", defaults.worker_concurrency)
                .max(1),
            task_timeout: Duration::from_secs(env_parsed(
                "TRS_TASK_TIMEOUT_SECS",
                DEFAULT_TASK_TIMEOUT_SECS,
            )),
            retention: Duration::from_secs(env_parsed(
                "TRS_RETENTION_SECS",
                DEFAULT_RETENTION_SECS,
            )),
            cleanup_interval: Duration::from_secs(env_parsed(
                "TRS_CLEANUP_INTERVAL_SECS",
                DEFAULT_CLEANUP_INTERVAL_SECS,
            )),
            rate_limit_per_minute: env_parsed(
                "TRS_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            shutdown_grace: Duration::from_secs(env_parsed(
                "TRS_SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )),
        }
    }

    /// True when the filename carries one of the accepted extensions.
    pub fn is_allowed_extension(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                ALLOWED_EXTENSIONS.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}
