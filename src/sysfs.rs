//! Linux devfreq backend.
//!
//! Frequencies come from the devfreq device directory and requests go through
//! the `userspace` governor's `set_freq` file. Load is a busy-percent file
//! (amdgpu `gpu_busy_percent` or similar).
//!
//! The load file is an average, so continuous activity is only known while
//! the GPU is saturated: `delta_active` is the time since the first 100%
//! sample of the current saturated run. A partially loaded GPU idles inside
//! every averaging window and reports 1ms (busy, never past a frame
//! deadline). An idle GPU reports 0.

use crate::backend::{Frequency, FrequencyBackend};
use crate::error::BackendError;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info};

const CUR_FREQ: &str = "cur_freq";
const MIN_FREQ: &str = "min_freq";
const MAX_FREQ: &str = "max_freq";
const SET_FREQ: &str = "userspace/set_freq";
const FULL_LOAD: u32 = 100;

pub struct SysfsBackend {
    devfreq_path: PathBuf,
    load_path: PathBuf,
    /// Start of the current saturated run, `None` otherwise
    saturated_since: Mutex<Option<Instant>>,
}

impl SysfsBackend {
    /// Open a devfreq device. Every file the backend uses must be present
    /// and the readable ones must parse.
    pub fn open(
        devfreq_path: impl Into<PathBuf>,
        load_path: impl Into<PathBuf>,
    ) -> Result<Self, BackendError> {
        let backend = Self {
            devfreq_path: devfreq_path.into(),
            load_path: load_path.into(),
            saturated_since: Mutex::new(None),
        };

        let min = backend.frequency_min()?;
        let max = backend.frequency_max()?;
        backend.frequency()?;
        backend.load()?;

        let set_freq = backend.devfreq_path.join(SET_FREQ);
        fs::metadata(&set_freq).map_err(|e| unavailable(&set_freq, e))?;

        info!(
            "Opened devfreq device {:?} ({} - {})",
            backend.devfreq_path, min, max
        );
        Ok(backend)
    }

    fn read_devfreq(&self, file: &str) -> Result<Frequency, BackendError> {
        read_value(&self.devfreq_path.join(file))
    }

    /// Read the load file and update the saturated-run tracking.
    fn sample(&self) -> Result<(u32, Option<Instant>), BackendError> {
        let load = read_value::<u32>(&self.load_path)?.min(FULL_LOAD);

        let mut saturated_since = self
            .saturated_since
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if load < FULL_LOAD {
            *saturated_since = None;
        } else if saturated_since.is_none() {
            *saturated_since = Some(Instant::now());
        }
        Ok((load, *saturated_since))
    }
}

impl FrequencyBackend for SysfsBackend {
    fn load(&self) -> Result<u32, BackendError> {
        self.sample().map(|(load, _)| load)
    }

    fn delta_active(&self) -> Result<u64, BackendError> {
        let (load, saturated_since) = self.sample()?;
        Ok(match saturated_since {
            Some(since) => (since.elapsed().as_millis() as u64).max(1),
            None if load > 0 => 1,
            None => 0,
        })
    }

    fn frequency(&self) -> Result<Frequency, BackendError> {
        self.read_devfreq(CUR_FREQ)
    }

    fn frequency_min(&self) -> Result<Frequency, BackendError> {
        self.read_devfreq(MIN_FREQ)
    }

    fn frequency_max(&self) -> Result<Frequency, BackendError> {
        self.read_devfreq(MAX_FREQ)
    }

    fn request_frequency(&self, frequency: Frequency) -> Result<(), BackendError> {
        let path = self.devfreq_path.join(SET_FREQ);
        fs::write(&path, format!("{}\n", frequency)).map_err(|e| BackendError::WriteFailed {
            path: path.display().to_string(),
            source: e,
        })?;
        debug!("Requested {} via {:?}", frequency, path);
        Ok(())
    }
}

fn read_value<T: FromStr>(path: &Path) -> Result<T, BackendError> {
    let contents = fs::read_to_string(path).map_err(|e| unavailable(path, e))?;
    let trimmed = contents.trim();
    trimmed.parse().map_err(|_| BackendError::InvalidValue {
        path: path.display().to_string(),
        value: trimmed.to_string(),
    })
}

fn unavailable(path: &Path, source: std::io::Error) -> BackendError {
    BackendError::Unavailable {
        path: path.display().to_string(),
        source,
    }
}
