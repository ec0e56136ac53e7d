//! Errors raised while loading, saving or validating a configuration file.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A value parsed but cannot be used.
    #[error("invalid '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigFileError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigFileError::ReadFile { path: path.into(), source }
    }

    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigFileError::WriteFile { path: path.into(), source }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigFileError::Invalid { field, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    #[test]
    fn read_file_names_the_path_and_keeps_the_source() {
        let err = ConfigFileError::read_file("/a/fxloop.toml", mock_io_err());
        let msg = err.to_string();
        assert!(msg.contains("failed to read file"), "got: {msg}");
        assert!(msg.contains("/a/fxloop.toml"), "got: {msg}");
        assert!(err.source().is_some());
    }

    #[test]
    fn invalid_display() {
        let err = ConfigFileError::invalid("pipeline.jitter_frames", "too large");
        assert_eq!(err.to_string(), "invalid 'pipeline.jitter_frames': too large");
        assert!(err.source().is_none());
    }
}
