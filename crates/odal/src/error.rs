//! Result and Error types for the crate.
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result containing an error variant from this module.
pub type Result<T> = std::result::Result<T, Error>;

/// Which of the layered configuration files failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Main,
    Overlay,
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigKind::Main => write!(f, "main"),
            ConfigKind::Overlay => write!(f, "overlay"),
        }
    }
}

/// Configuration error variants.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// The file could not be read.
    #[error("failed to read {kind} config `{}`", path.display())]
    #[diagnostic(help("make sure the file exists and is readable"))]
    Read {
        path: PathBuf,
        kind: ConfigKind,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML.
    #[error("failed to parse {kind} config `{}`", path.display())]
    #[diagnostic(help("check the TOML syntax of the file"))]
    Parse {
        path: PathBuf,
        kind: ConfigKind,
        #[source]
        source: toml::de::Error,
    },

    /// The merged table does not match the configuration type.
    #[error("config `{name}` does not match its type")]
    #[diagnostic(help("unknown or missing keys are rejected, compare against the default file"))]
    Deserialize {
        name: &'static str,
        #[source]
        source: toml::de::Error,
    },

    /// The overlay changes the type of a value in the main file.
    #[error("overlay changes the type of `{key}`")]
    #[diagnostic(help("overlay values must have the same type as the value they replace"))]
    TypeMismatch { key: String },
}
