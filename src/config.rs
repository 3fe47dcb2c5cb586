use crate::error::{MediavisorError, Result};
use crate::platform::{locate, Platform};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tuning for one [`MediaProcessor`](crate::MediaProcessor).
///
/// Empty paths and zero limits are filled in by [`Config::with_defaults`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Encoder binary (ffmpeg).
    pub encoder_path: PathBuf,
    /// Prober binary (ffprobe).
    pub prober_path: PathBuf,
    /// Working directory for every subprocess.
    pub work_dir: PathBuf,
    /// Maximum number of live subprocesses.
    pub max_processes: usize,
    /// Value passed to `-threads` for every encoder invocation.
    pub max_threads: usize,
    /// Wall-clock limit per subprocess. Zero disables the limit.
    #[serde(with = "duration_secs")]
    pub max_process_time: Duration,
    /// Request hardware-accelerated decoding.
    pub hw_accel: bool,
    /// GPU selector passed as `-hwaccel_device` when acceleration is on.
    pub gpu_index: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoder_path: PathBuf::new(),
            prober_path: PathBuf::new(),
            work_dir: PathBuf::new(),
            max_processes: 0,
            max_threads: 0,
            max_process_time: Duration::ZERO,
            hw_accel: false,
            gpu_index: None,
        }
    }
}

/// Serde helpers to (de)serialize `Duration` as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Config {
    /// Load the config file if it exists, otherwise return an all-default config.
    ///
    /// Environment variables are deliberately not consulted here.
    pub fn load() -> Result<Self> {
        match Self::config_file_path() {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)?;
                Self::from_toml(&contents)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| MediavisorError::Config(e.to_string()))
    }

    /// Populate every empty or zero field.
    pub fn with_defaults(mut self, platform: Platform) -> Self {
        if self.encoder_path.as_os_str().is_empty() {
            self.encoder_path = locate(platform.encoder_candidates());
        }
        if self.prober_path.as_os_str().is_empty() {
            self.prober_path = locate(platform.prober_candidates());
        }
        if self.work_dir.as_os_str().is_empty() {
            self.work_dir = std::env::temp_dir().join("mediavisor");
        }

        let cpus = num_cpus::get().max(1);
        if self.max_processes == 0 {
            self.max_processes = cpus;
        }
        if self.max_threads == 0 {
            self.max_threads = cpus;
        }

        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_processes == 0 {
            return Err(MediavisorError::Config(
                "max_processes must be greater than 0".to_string(),
            ));
        }
        if self.max_threads == 0 {
            return Err(MediavisorError::Config(
                "max_threads must be greater than 0".to_string(),
            ));
        }
        if self.encoder_path.as_os_str().is_empty() || self.prober_path.as_os_str().is_empty() {
            return Err(MediavisorError::Config(
                "encoder and prober paths must be set".to_string(),
            ));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(MediavisorError::Config("work_dir must be set".to_string()));
        }

        Ok(())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mediavisor").join("config.toml"))
    }
}
