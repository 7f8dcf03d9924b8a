//! Layered TOML configuration.
//!
//! A configuration type lives in a single file called [`Config::PATH`]. A robot- or
//! scenario-specific overlay with the same file name may override any subset of its keys.

mod error;

use std::path::Path;

use serde::de::DeserializeOwned;
use toml::{Table, Value};

pub use error::{ConfigKind, Error, Result};

/// A configuration that can be loaded from a TOML file.
pub trait Config: DeserializeOwned {
    /// The file name of this configuration, relative to a configuration directory.
    const PATH: &'static str;

    /// Loads the configuration from `dir`.
    fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let table = read_table(&dir.as_ref().join(Self::PATH), ConfigKind::Main)?;
        Self::from_table(table)
    }

    /// Loads the configuration from `main_dir`, overriding values with those in `overlay_dir`.
    ///
    /// A missing overlay file is not an error, the main configuration is used as is.
    fn load_with_overlay(main_dir: impl AsRef<Path>, overlay_dir: impl AsRef<Path>) -> Result<Self> {
        let main = read_table(&main_dir.as_ref().join(Self::PATH), ConfigKind::Main)?;
        let overlay_path = overlay_dir.as_ref().join(Self::PATH);
        if !overlay_path.exists() {
            return Self::from_table(main);
        }

        let overlay = read_table(&overlay_path, ConfigKind::Overlay)?;
        Self::from_table(merge(main, overlay)?)
    }

    /// Deserializes the configuration from an already parsed table.
    fn from_table(table: Table) -> Result<Self> {
        Value::Table(table)
            .try_into()
            .map_err(|source| Error::Deserialize {
                name: Self::PATH,
                source,
            })
    }
}

fn read_table(path: &Path, kind: ConfigKind) -> Result<Table> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        kind,
        source,
    })?;

    contents.parse().map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        kind,
        source,
    })
}

/// Recursively merges `overlay` into `main`.
///
/// Tables are merged key by key, any other value in the overlay replaces the one in `main`.
/// Keys that only exist in the overlay are added, deserialization decides whether they are allowed.
pub fn merge(mut main: Table, overlay: Table) -> Result<Table> {
    for (key, value) in overlay {
        let merged = match (main.remove(&key), value) {
            (Some(Value::Table(main_table)), Value::Table(overlay_table)) => {
                Value::Table(merge(main_table, overlay_table)?)
            }
            (Some(Value::Table(_)), _) | (Some(_), Value::Table(_)) => {
                return Err(Error::TypeMismatch { key });
            }
            (_, value) => value,
        };

        main.insert(key, merged);
    }

    Ok(main)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde::Deserialize;
    use tempfile::tempdir;

    use super::*;

    #[derive(Deserialize, Debug, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct TestConfig {
        gain: f64,
        nested: NestedConfig,
    }

    #[derive(Deserialize, Debug, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct NestedConfig {
        enabled: bool,
        window: u32,
    }

    impl Config for TestConfig {
        const PATH: &'static str = "test.toml";
    }

    const MAIN: &str = r"
        gain = 1.5

        [nested]
        enabled = true
        window = 3
    ";

    #[test]
    fn load_main() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(TestConfig::PATH), MAIN).unwrap();

        let config = TestConfig::load(dir.path()).unwrap();
        assert_eq!(
            config,
            TestConfig {
                gain: 1.5,
                nested: NestedConfig {
                    enabled: true,
                    window: 3
                }
            }
        );
    }

    #[test]
    fn overlay_overrides_nested_values() {
        let main_dir = tempdir().unwrap();
        let overlay_dir = tempdir().unwrap();
        fs::write(main_dir.path().join(TestConfig::PATH), MAIN).unwrap();
        fs::write(
            overlay_dir.path().join(TestConfig::PATH),
            "[nested]\nwindow = 5\n",
        )
        .unwrap();

        let config = TestConfig::load_with_overlay(main_dir.path(), overlay_dir.path()).unwrap();
        assert!((config.gain - 1.5).abs() < f64::EPSILON);
        assert!(config.nested.enabled);
        assert_eq!(config.nested.window, 5);
    }

    #[test]
    fn missing_overlay_uses_main() {
        let main_dir = tempdir().unwrap();
        let overlay_dir = tempdir().unwrap();
        fs::write(main_dir.path().join(TestConfig::PATH), MAIN).unwrap();

        let config = TestConfig::load_with_overlay(main_dir.path(), overlay_dir.path()).unwrap();
        assert_eq!(config.nested.window, 3);
    }

    #[test]
    fn unknown_overlay_key_is_rejected() {
        let main_dir = tempdir().unwrap();
        let overlay_dir = tempdir().unwrap();
        fs::write(main_dir.path().join(TestConfig::PATH), MAIN).unwrap();
        fs::write(overlay_dir.path().join(TestConfig::PATH), "typo = 1\n").unwrap();

        let error = TestConfig::load_with_overlay(main_dir.path(), overlay_dir.path()).unwrap_err();
        assert!(matches!(error, Error::Deserialize { .. }));
    }

    #[test]
    fn missing_main_reports_path() {
        let dir = tempdir().unwrap();

        match TestConfig::load(dir.path()) {
            Err(Error::Read { path, kind, .. }) => {
                assert_eq!(kind, ConfigKind::Main);
                assert!(path.ends_with(TestConfig::PATH));
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn merge_rejects_type_change() {
        let main: Table = "[nested]\nwindow = 3\n".parse().unwrap();
        let overlay: Table = "nested = 4\n".parse().unwrap();

        assert!(matches!(
            merge(main, overlay),
            Err(Error::TypeMismatch { key }) if key == "nested"
        ));
    }
}
