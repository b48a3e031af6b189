use rollcall_core::{ARCFACE_MODEL_FILE, DEFAULT_MATCH_TOLERANCE, SCRFD_MODEL_FILE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("downscale must be in (0, 1], got {0}")]
    InvalidDownscale(f32),
    #[error("match tolerance must be a positive distance, got {0}")]
    InvalidTolerance(f32),
}

/// Runtime configuration.
///
/// Layered: defaults, then the TOML file, then `ROLLCALL_*` environment
/// variables; CLI flags are applied last by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory of reference photos, one identity per file stem.
    pub photos_dir: PathBuf,
    /// Roster CSV with `Name`, `Student Id` and `Branch` columns.
    pub roster_path: PathBuf,
    /// Attendance log CSV, created on first use.
    pub attendance_path: PathBuf,
    /// V4L2 camera index (`/dev/video{index}`).
    pub camera_index: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Largest signature distance still treated as the same person.
    pub match_tolerance: f32,
    /// Per-axis scale applied to frames before detection.
    pub downscale: f32,
    /// Whether to open the preview window.
    pub preview: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            photos_dir: PathBuf::from("photos"),
            roster_path: PathBuf::from("input.csv"),
            attendance_path: PathBuf::from("Attendencebook.csv"),
            camera_index: 0,
            model_dir: rollcall_core::default_model_dir(),
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
            downscale: 0.25,
            preview: true,
        }
    }
}

/// On-disk form; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    photos_dir: Option<PathBuf>,
    roster_path: Option<PathBuf>,
    attendance_path: Option<PathBuf>,
    camera_index: Option<u32>,
    model_dir: Option<PathBuf>,
    match_tolerance: Option<f32>,
    downscale: Option<f32>,
    preview: Option<bool>,
}

impl Config {
    /// Load from an optional TOML file (or `ROLLCALL_CONFIG`) and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(file, |key| std::env::var(key).ok())
    }

    fn load_with(
        file: Option<&Path>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let env_file = var("ROLLCALL_CONFIG").map(PathBuf::from);
        if let Some(path) = file.map(Path::to_path_buf).or(env_file) {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            config.apply_toml(&text).map_err(|source| ConfigError::Parse { path, source })?;
        }

        config.apply_env(var);
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;
        let or = |v: Option<PathBuf>, current: &PathBuf| v.unwrap_or_else(|| current.clone());
        self.photos_dir = or(file.photos_dir, &self.photos_dir);
        self.roster_path = or(file.roster_path, &self.roster_path);
        self.attendance_path = or(file.attendance_path, &self.attendance_path);
        self.model_dir = or(file.model_dir, &self.model_dir);
        self.camera_index = file.camera_index.unwrap_or(self.camera_index);
        self.match_tolerance = file.match_tolerance.unwrap_or(self.match_tolerance);
        self.downscale = file.downscale.unwrap_or(self.downscale);
        self.preview = file.preview.unwrap_or(self.preview);
        Ok(())
    }

    /// Override from `ROLLCALL_*` variables. Unparsable values are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ROLLCALL_PHOTOS_DIR") {
            self.photos_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_ROSTER_PATH") {
            self.roster_path = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_ATTENDANCE_PATH") {
            self.attendance_path = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.camera_index = env_parse(&var, "ROLLCALL_CAMERA_INDEX", self.camera_index);
        self.match_tolerance = env_parse(&var, "ROLLCALL_MATCH_TOLERANCE", self.match_tolerance);
        self.downscale = env_parse(&var, "ROLLCALL_DOWNSCALE", self.downscale);
        if let Some(v) = var("ROLLCALL_PREVIEW") {
            self.preview = !matches!(v.trim(), "0" | "false" | "no" | "off");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            return Err(ConfigError::InvalidDownscale(self.downscale));
        }
        if !(self.match_tolerance > 0.0 && self.match_tolerance.is_finite()) {
            return Err(ConfigError::InvalidTolerance(self.match_tolerance));
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(ARCFACE_MODEL_FILE)
    }
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            default
        }),
        None => default,
    }
}
