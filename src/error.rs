use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DwcaError {
    #[error("meta.xml not found under {0}")]
    MetaNotFound(PathBuf),

    #[error("multiple meta.xml files found under {0}")]
    MultipleMetaFiles(PathBuf),

    #[error("cannot decode meta.xml: {0}")]
    MetaDecode(String),

    #[error("invalid field index '{index}' for term {term}")]
    InvalidFieldIndex { index: String, term: String },

    #[error("file location is empty for {0}")]
    MissingLocation(String),

    #[error("extracting '{path}' failed: {message}")]
    Extract { path: PathBuf, message: String },

    #[error("{file}: wrong number of fields at line {line} (expected {expected}, found {found})")]
    BadRow {
        file: String,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("cannot read {path}: {message}")]
    FileRead { path: PathBuf, message: String },

    #[error("cannot write {path}: {message}")]
    FileWrite { path: PathBuf, message: String },

    #[error("no data in the core file")]
    NoCoreData,

    #[error("{stage} failed: {source}")]
    Pipeline {
        stage: &'static str,
        #[source]
        source: Box<DwcaError>,
    },

    #[error("processing was cancelled")]
    Cancelled,

    #[error("a {0} task panicked")]
    WorkerPanic(&'static str),

    #[error("scientific names assembled from separate epithet fields are not supported yet")]
    UnsupportedNameShape,

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Schema,
    Extract,
    Dialect,
    Classification,
    Pipeline,
    UnsupportedShape,
    Environment,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Schema => "schema",
            ErrorCategory::Extract => "extract",
            ErrorCategory::Dialect => "dialect",
            ErrorCategory::Classification => "classification",
            ErrorCategory::Pipeline => "pipeline",
            ErrorCategory::UnsupportedShape => "unsupported-shape",
            ErrorCategory::Environment => "environment",
        };
        f.write_str(name)
    }
}

impl DwcaError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DwcaError::MetaNotFound(_)
            | DwcaError::MultipleMetaFiles(_)
            | DwcaError::MetaDecode(_)
            | DwcaError::InvalidFieldIndex { .. }
            | DwcaError::MissingLocation(_) => ErrorCategory::Schema,
            DwcaError::Extract { .. } => ErrorCategory::Extract,
            DwcaError::BadRow { .. } | DwcaError::FileRead { .. } | DwcaError::FileWrite { .. } => {
                ErrorCategory::Dialect
            }
            DwcaError::NoCoreData => ErrorCategory::Classification,
            DwcaError::Pipeline { .. } | DwcaError::Cancelled | DwcaError::WorkerPanic(_) => {
                ErrorCategory::Pipeline
            }
            DwcaError::UnsupportedNameShape => ErrorCategory::UnsupportedShape,
            DwcaError::Filesystem(_)
            | DwcaError::ConfigRead(_)
            | DwcaError::ConfigParse(_)
            | DwcaError::InvalidOption(_)
            | DwcaError::Download(_)
            | DwcaError::DownloadStatus { .. } => ErrorCategory::Environment,
        }
    }

    /// True when the error only reports cooperative shutdown.
    pub fn is_cancelled(&self) -> bool {
        match self {
            DwcaError::Cancelled => true,
            DwcaError::Pipeline { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Innermost error behind any pipeline wrapping.
    pub fn root(&self) -> &DwcaError {
        match self {
            DwcaError::Pipeline { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_wrapping_keeps_category_and_root() {
        let err = DwcaError::Pipeline {
            stage: "core",
            source: Box::new(DwcaError::BadRow {
                file: "taxon.txt".to_string(),
                line: 5,
                expected: 4,
                found: 3,
            }),
        };
        assert_eq!(err.category(), ErrorCategory::Pipeline);
        assert_eq!(err.root().category(), ErrorCategory::Dialect);
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("line 5"));
    }

    #[test]
    fn cancelled_is_detected_through_wrapping() {
        let err = DwcaError::Pipeline {
            stage: "hierarchy",
            source: Box::new(DwcaError::Cancelled),
        };
        assert!(err.is_cancelled());
    }
}
