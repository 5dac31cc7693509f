use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::receipt::Vendor;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Aggregation config: a display time zone plus one entry per target.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub target: BTreeMap<String, Target>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    pub vendor: String,
    pub workspace: PathBuf,
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Parses and checks the config. Unknown vendors and time zones are
    /// rejected here rather than at export time.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.tz()?;
        for target in config.target.values() {
            target.vendor()?;
        }
        Ok(config)
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| Error::UnknownTimezone(self.timezone.clone()))
    }

    pub fn target(&self, name: &str) -> Result<&Target> {
        self.target
            .get(name)
            .ok_or_else(|| Error::UnknownTarget(name.to_string()))
    }

    /// Targets to process: the named one, or all of them in name order.
    pub fn selected<'a>(&'a self, name: Option<&str>) -> Result<Vec<(&'a str, &'a Target)>> {
        match name {
            Some(name) => self
                .target
                .get_key_value(name)
                .map(|(name, target)| vec![(name.as_str(), target)])
                .ok_or_else(|| Error::UnknownTarget(name.to_string())),
            None => Ok(self
                .target
                .iter()
                .map(|(name, target)| (name.as_str(), target))
                .collect()),
        }
    }
}

impl Target {
    pub fn vendor(&self) -> Result<Vendor> {
        self.vendor.parse()
    }

    pub fn mail_dir(&self) -> PathBuf {
        self.workspace.join("mail")
    }

    pub fn markdown_path(&self, name: &str) -> PathBuf {
        self.workspace.join(format!("{name}.md"))
    }

    pub fn csv_path(&self, name: &str) -> PathBuf {
        self.workspace.join(format!("{name}.csv"))
    }
}
