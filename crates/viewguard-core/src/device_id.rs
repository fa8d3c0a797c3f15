//! Identity of this child device.
//!
//! Parents key per-device overrides and schedules by this id. A
//! `[device] device_id` in the config wins; otherwise an id is generated on
//! first start and kept in the data directory.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;

const ID_FILE: &str = "device_id";
const GENERATED_PREFIX: &str = "viewguard-";

#[derive(Debug, thiserror::Error)]
pub enum DeviceIdError {
    #[error("Device id file unavailable: {0}")]
    Io(#[from] std::io::Error),

    /// The stored file does not hold an id this crate generated.
    #[error("Corrupt device id file: {0:?}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    fn generate() -> Self {
        Self(format!("{GENERATED_PREFIX}{}", Uuid::new_v4()))
    }

    /// Parse the contents of the id file: `viewguard-<uuid>`.
    pub fn parse_stored(raw: &str) -> Result<Self, DeviceIdError> {
        let raw = raw.trim();
        raw.strip_prefix(GENERATED_PREFIX)
            .and_then(|uuid| Uuid::parse_str(uuid).ok())
            .map(|_| Self(raw.to_owned()))
            .ok_or_else(|| DeviceIdError::Corrupt(raw.to_owned()))
    }

    /// Read the id kept in `dir`, generating and storing one if absent.
    pub fn load_or_create(dir: &Path) -> Result<Self, DeviceIdError> {
        let path = dir.join(ID_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let id = Self::parse_stored(&raw)?;
                debug!(device_id = %id, "loaded device id");
                Ok(id)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let id = Self::generate();
                fs::create_dir_all(dir)?;
                fs::write(&path, format!("{id}\n"))?;
                info!(device_id = %id, path = %path.display(), "generated device id");
                Ok(id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Configured id if set, else the one kept in `dir`.
    pub fn resolve(config: &Config, dir: &Path) -> Result<Self, DeviceIdError> {
        match config.device.device_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(Self(id.to_owned())),
            _ => Self::load_or_create(dir),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
