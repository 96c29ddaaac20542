//! Reads the generator settings file. The format is picked from the
//! extension; keys left out of the file keep their defaults.

use fracture_core::config::Settings;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// File stem looked up by [`find_settings_file`].
pub const SETTINGS_BASE_NAME: &str = "settings";

#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("{file}: not a .ron, .toml, or .json file")]
    UnsupportedFormat { file: PathBuf },

    /// More than one `settings.*` file in the same directory.
    #[error("ambiguous settings: both {a} and {b} exist")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("failed to parse {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Formats
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    /// Lookup order for [`find_settings_file`].
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }

    fn parse<T: DeserializeOwned>(self, text: &str) -> Result<T, String> {
        match self {
            Format::Ron => ron::from_str(text).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        }
    }
}

pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    let ext = path.extension().and_then(|e| e.to_str());
    Format::ALL
        .into_iter()
        .find(|format| Some(format.extension()) == ext)
        .ok_or_else(|| DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

/// The single `settings.{ron,toml,json}` in `dir`, if any.
pub fn find_settings_file(dir: &Path) -> Result<Option<PathBuf>, DataLoadError> {
    let mut present = Format::ALL
        .into_iter()
        .map(|format| dir.join(format!("{SETTINGS_BASE_NAME}.{}", format.extension())))
        .filter(|path| path.is_file());

    let first = present.next();
    match (first, present.next()) {
        (Some(a), Some(b)) => Err(DataLoadError::ConflictingFormats { a, b }),
        (first, _) => Ok(first),
    }
}

// ===========================================================================
// Loading
// ===========================================================================

pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let text = fs::read_to_string(path)?;
    format.parse(&text).map_err(|detail| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    })
}

/// Parse `path` and clamp out-of-range values.
pub fn load_settings(path: &Path) -> Result<Settings, DataLoadError> {
    deserialize_file::<Settings>(path).map(Settings::sanitized)
}

/// Settings from the file in `dir`, or defaults when there is none.
pub fn load_settings_dir(dir: &Path) -> Result<Settings, DataLoadError> {
    let Some(path) = find_settings_file(dir)? else {
        info!(dir = %dir.display(), "no settings file, using defaults");
        return Ok(Settings::default());
    };
    info!(file = %path.display(), "loading settings");
    load_settings(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fracture_loader_{name}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    // -----------------------------------------------------------------------
    // Format detection and discovery
    // -----------------------------------------------------------------------

    #[test]
    fn extension_picks_format() {
        for format in Format::ALL {
            let name = format!("settings.{}", format.extension());
            assert_eq!(detect_format(Path::new(&name)).unwrap(), format);
        }
        for bad in ["settings.yml", "settings"] {
            assert!(matches!(
                detect_format(Path::new(bad)),
                Err(DataLoadError::UnsupportedFormat { .. })
            ));
        }
    }

    #[test]
    fn discovery_none_one_or_conflict() {
        let dir = scratch_dir("discovery");
        assert_eq!(find_settings_file(&dir).unwrap(), None);

        fs::write(dir.join("settings.json"), "{}").unwrap();
        assert_eq!(
            find_settings_file(&dir).unwrap(),
            Some(dir.join("settings.json"))
        );

        fs::write(dir.join("settings.toml"), "").unwrap();
        assert!(matches!(
            find_settings_file(&dir),
            Err(DataLoadError::ConflictingFormats { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn toml_overrides_only_listed_keys() {
        let dir = scratch_dir("toml");
        let path = dir.join("settings.toml");
        fs::write(
            &path,
            "[performance]\nmax-generators-per-chunk = 4\nasync-processing = false\n\n\
             [generators]\nmax-spawn-rate = 120\n",
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.performance.max_generators_per_chunk, 4);
        assert!(!settings.performance.async_processing);
        assert_eq!(settings.performance.max_generators_per_player, 50);
        assert_eq!(settings.generators.max_spawn_rate, 120);
        assert_eq!(settings.generators.default_spawn_rate, 60);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn ron_kebab_keys() {
        let dir = scratch_dir("ron");
        let path = dir.join("settings.ron");
        fs::write(&path, "(performance: (r#max-items-per-tick: 7))").unwrap();
        assert_eq!(load_settings(&path).unwrap().performance.max_items_per_tick, 7);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn json_values_are_sanitized() {
        let dir = scratch_dir("json");
        let path = dir.join("settings.json");
        fs::write(
            &path,
            r#"{ "performance": { "generator-tick-interval": 0 }, "generators": { "default-spawn-rate": 9000 } }"#,
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.performance.generator_tick_interval, 1);
        assert_eq!(settings.generators.default_spawn_rate, 300);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn negative_toml_values_clamp_instead_of_failing() {
        let dir = scratch_dir("negative");
        let path = dir.join("settings.toml");
        fs::write(
            &path,
            "[performance]\nmax-items-per-tick = -5\nmax-generators-per-chunk = -1\n",
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.performance.max_items_per_tick, 0);
        assert_eq!(settings.performance.max_generators_per_chunk, 0);
        assert_eq!(settings.performance.max_generators_per_player, 50);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn broken_file_reports_its_path() {
        let dir = scratch_dir("broken");
        let path = dir.join("settings.toml");
        fs::write(&path, "[performance\nbroken").unwrap();

        match load_settings(&path) {
            Err(DataLoadError::Parse { file, .. }) => assert_eq!(file, path),
            other => panic!("expected parse error, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_dir_gives_defaults() {
        let dir = scratch_dir("defaults");
        assert_eq!(load_settings_dir(&dir).unwrap(), Settings::default());
        let _ = fs::remove_dir_all(&dir);
    }
}
