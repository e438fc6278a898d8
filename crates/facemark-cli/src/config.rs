use facemark_core::LoopConfig;
use serde::Serialize;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the gallery snapshot.
    pub gallery_path: PathBuf,
    /// Archive of enrollment images, one `{name}_{n}.jpg` per enrollment.
    pub images_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub match_threshold: f32,
    /// Integer shrink factor applied to frames before extraction.
    pub downscale: u32,
    /// Consecutive capture failures before the watcher gives up.
    pub max_capture_failures: usize,
    /// Directory the camera drops frames into.
    pub spool_dir: PathBuf,
    /// Poll interval while the spool directory is empty.
    pub poll_interval_ms: u64,
    /// External face extraction program.
    pub extractor: Option<PathBuf>,
    /// Where daily CSV reports are written.
    pub export_dir: PathBuf,
    /// Where archived snapshot images are decoded to.
    pub download_dir: PathBuf,
}

impl Config {
    /// Load configuration from `FACEMARK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facemark");

        Self {
            db_path: env_path("FACEMARK_DB_PATH")
                .unwrap_or_else(|| data_dir.join("attendance.db")),
            gallery_path: env_path("FACEMARK_GALLERY_PATH")
                .unwrap_or_else(|| data_dir.join("gallery.json")),
            images_dir: env_path("FACEMARK_IMAGES_DIR")
                .unwrap_or_else(|| data_dir.join("employee_images")),
            match_threshold: env_parse(
                "FACEMARK_MATCH_THRESHOLD",
                facemark_core::DEFAULT_MATCH_THRESHOLD,
            ),
            downscale: env_parse("FACEMARK_DOWNSCALE", 4),
            max_capture_failures: env_parse("FACEMARK_MAX_CAPTURE_FAILURES", 5),
            spool_dir: env_path("FACEMARK_SPOOL_DIR").unwrap_or_else(|| data_dir.join("spool")),
            poll_interval_ms: env_parse("FACEMARK_POLL_INTERVAL_MS", 200),
            extractor: env_path("FACEMARK_EXTRACTOR"),
            export_dir: env_path("FACEMARK_EXPORT_DIR")
                .unwrap_or_else(|| data_dir.join("reports")),
            download_dir: env_path("FACEMARK_DOWNLOAD_DIR")
                .unwrap_or_else(|| data_dir.join("images")),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            threshold: self.match_threshold,
            downscale: self.downscale,
            max_capture_failures: self.max_capture_failures,
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
