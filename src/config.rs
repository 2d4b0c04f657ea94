use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DwcaError;

pub const DEFAULT_JOBS: usize = 5;
pub const MAX_JOBS: usize = 100;
pub const CONFIG_FILE: &str = "dwca-norm.json";

/// What to do with a row whose field count differs from the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadRowPolicy {
    #[default]
    Error,
    Skip,
    Process,
}

impl FromStr for BadRowPolicy {
    type Err = DwcaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stop" | "error" => Ok(BadRowPolicy::Error),
            "ignore" | "skip" => Ok(BadRowPolicy::Skip),
            "process" => Ok(BadRowPolicy::Process),
            _ => Err(DwcaError::InvalidOption(format!(
                "wrong-fields-num must be stop|ignore|process, got '{value}'"
            ))),
        }
    }
}

impl fmt::Display for BadRowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadRowPolicy::Error => write!(f, "stop"),
            BadRowPolicy::Skip => write!(f, "ignore"),
            BadRowPolicy::Process => write!(f, "process"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    #[serde(alias = "tar.gz")]
    Tar,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar.gz",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = DwcaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar" | "tar.gz" | "tgz" => Ok(ArchiveFormat::Tar),
            _ => Err(DwcaError::InvalidOption(format!(
                "archive-format must be zip|tar, got '{value}'"
            ))),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::Tar => write!(f, "tar"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDelimiter {
    #[default]
    Csv,
    Tsv,
}

impl OutputDelimiter {
    pub fn byte(&self) -> u8 {
        match self {
            OutputDelimiter::Csv => b',',
            OutputDelimiter::Tsv => b'\t',
        }
    }

    /// Delimiter as written into meta.xml.
    pub fn meta_value(&self) -> &'static str {
        match self {
            OutputDelimiter::Csv => ",",
            OutputDelimiter::Tsv => "\\t",
        }
    }

    /// Quote character as written into meta.xml; tsv output is never quoted.
    pub fn meta_quote(&self) -> &'static str {
        match self {
            OutputDelimiter::Csv => "\"",
            OutputDelimiter::Tsv => "",
        }
    }
}

impl FromStr for OutputDelimiter {
    type Err = DwcaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Ok(OutputDelimiter::Csv),
            "tsv" => Ok(OutputDelimiter::Tsv),
            _ => Err(DwcaError::InvalidOption(format!(
                "csv-type must be csv|tsv, got '{value}'"
            ))),
        }
    }
}

impl fmt::Display for OutputDelimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputDelimiter::Csv => write!(f, "csv"),
            OutputDelimiter::Tsv => write!(f, "tsv"),
        }
    }
}

/// On-disk shape of `dwca-norm.json`. Every key is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigFile {
    #[serde(default)]
    pub root_path: Option<String>,
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub wrong_fields_num: Option<String>,
    #[serde(default)]
    pub archive_format: Option<String>,
    #[serde(default)]
    pub csv_type: Option<String>,
}

/// Values supplied on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub root_path: Option<Utf8PathBuf>,
    pub jobs: Option<usize>,
    pub bad_row: Option<BadRowPolicy>,
    pub archive_format: Option<ArchiveFormat>,
    pub output_delimiter: Option<OutputDelimiter>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub root_path: Utf8PathBuf,
    pub download_path: Utf8PathBuf,
    pub extract_path: Utf8PathBuf,
    pub output_path: Utf8PathBuf,
    pub jobs: usize,
    pub bad_row: BadRowPolicy,
    pub archive_format: ArchiveFormat,
    pub output_delimiter: OutputDelimiter,
}

impl Config {
    pub fn new(root_path: Utf8PathBuf) -> Self {
        Self {
            download_path: root_path.join("download"),
            extract_path: root_path.join("extract"),
            output_path: root_path.join("output"),
            root_path,
            jobs: DEFAULT_JOBS,
            bad_row: BadRowPolicy::default(),
            archive_format: ArchiveFormat::default(),
            output_delimiter: OutputDelimiter::default(),
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = checked_jobs(jobs);
        self
    }

    pub fn with_bad_row(mut self, policy: BadRowPolicy) -> Self {
        self.bad_row = policy;
        self
    }

    pub fn with_archive_format(mut self, format: ArchiveFormat) -> Self {
        self.archive_format = format;
        self
    }

    pub fn with_output_delimiter(mut self, delimiter: OutputDelimiter) -> Self {
        self.output_delimiter = delimiter;
        self
    }

    fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(root) = &overrides.root_path {
            let rebased = Config::new(root.clone());
            self.root_path = rebased.root_path;
            self.download_path = rebased.download_path;
            self.extract_path = rebased.extract_path;
            self.output_path = rebased.output_path;
        }
        if let Some(jobs) = overrides.jobs {
            self = self.with_jobs(jobs);
        }
        if let Some(policy) = overrides.bad_row {
            self.bad_row = policy;
        }
        if let Some(format) = overrides.archive_format {
            self.archive_format = format;
        }
        if let Some(delimiter) = overrides.output_delimiter {
            self.output_delimiter = delimiter;
        }
        self
    }
}

fn checked_jobs(jobs: usize) -> usize {
    if (1..=MAX_JOBS).contains(&jobs) {
        return jobs;
    }
    warn!(
        bad_input = jobs,
        default = DEFAULT_JOBS,
        "unsupported number of jobs (supported: 1-100), using default"
    );
    DEFAULT_JOBS
}

pub fn default_root_path() -> Result<Utf8PathBuf, DwcaError> {
    let base = BaseDirs::new()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    Utf8PathBuf::from_path_buf(base.join("dwca-normalizer"))
        .map_err(|_| DwcaError::Filesystem("unable to resolve cache directory".to_string()))
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the JSON config file (if any), then overrides.
    pub fn resolve(path: Option<&str>, overrides: &ConfigOverrides) -> Result<Config, DwcaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        let file = if path.is_none() && !config_path.exists() {
            ConfigFile::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| DwcaError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| DwcaError::ConfigParse(err.to_string()))?
        };

        let base = match &overrides.root_path {
            Some(root) => Config::new(root.clone()),
            None => Config::new(default_root_path()?),
        };
        let config = Self::resolve_file(base, file)?;
        Ok(config.apply(overrides))
    }

    pub fn resolve_file(base: Config, file: ConfigFile) -> Result<Config, DwcaError> {
        let mut config = match file.root_path {
            Some(root) if !root.trim().is_empty() => {
                let rebased = Config::new(Utf8PathBuf::from(root.trim()));
                Config {
                    jobs: base.jobs,
                    bad_row: base.bad_row,
                    archive_format: base.archive_format,
                    output_delimiter: base.output_delimiter,
                    ..rebased
                }
            }
            _ => base,
        };
        if let Some(jobs) = file.jobs {
            config = config.with_jobs(jobs);
        }
        if let Some(value) = file.wrong_fields_num {
            config.bad_row = value.parse()?;
        }
        if let Some(value) = file.archive_format {
            config.archive_format = value.parse()?;
        }
        if let Some(value) = file.csv_type {
            config.output_delimiter = value.parse()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_derive_directories_from_root() {
        let config = Config::new(Utf8PathBuf::from("/tmp/dwca"));
        assert_eq!(config.extract_path, Utf8PathBuf::from("/tmp/dwca/extract"));
        assert_eq!(config.output_path, Utf8PathBuf::from("/tmp/dwca/output"));
        assert_eq!(config.jobs, DEFAULT_JOBS);
        assert_eq!(config.bad_row, BadRowPolicy::Error);
    }

    #[test]
    fn out_of_range_jobs_fall_back_to_default() {
        let config = Config::new(Utf8PathBuf::from("/tmp/dwca")).with_jobs(500);
        assert_eq!(config.jobs, DEFAULT_JOBS);
        let config = Config::new(Utf8PathBuf::from("/tmp/dwca")).with_jobs(0);
        assert_eq!(config.jobs, DEFAULT_JOBS);
    }

    #[test]
    fn file_values_are_parsed() {
        let file = ConfigFile {
            root_path: Some("/data/dwca".to_string()),
            jobs: Some(8),
            wrong_fields_num: Some("process".to_string()),
            archive_format: Some("tar".to_string()),
            csv_type: Some("tsv".to_string()),
        };
        let config =
            ConfigLoader::resolve_file(Config::new(Utf8PathBuf::from("/tmp")), file).unwrap();
        assert_eq!(config.root_path, Utf8PathBuf::from("/data/dwca"));
        assert_eq!(config.jobs, 8);
        assert_eq!(config.bad_row, BadRowPolicy::Process);
        assert_eq!(config.archive_format, ArchiveFormat::Tar);
        assert_eq!(config.output_delimiter, OutputDelimiter::Tsv);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = "sometimes".parse::<BadRowPolicy>().unwrap_err();
        assert_matches!(err, DwcaError::InvalidOption(_));
    }
}
