use iknowu_core::CnnSettings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    ConfigReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {message}")]
    ConfigParseFailed { path: PathBuf, message: String },
    #[error("configuration key `{0}` is missing")]
    MissingKey(&'static str),
}

/// Parsed configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: General,
    pub person: Vec<Person>,
    pub model: CnnSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct General {
    /// Dataset root; relative paths are taken from the configuration file's directory.
    pub directory: Option<PathBuf>,
}

/// A known person. Only `nick` is used; other fields are carried along.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Person {
    pub nick: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Person {
    /// Full name, when the record carries a `name` string.
    pub fn name(&self) -> Option<&str> {
        self.extra.get("name").and_then(|v| v.as_str())
    }
}

/// Outcome of parsing a configuration document, tagged by the format that accepted it.
#[derive(Debug)]
pub enum Parsed {
    Json(Settings),
    Yaml(Settings),
    Toml(Settings),
    Failed(String),
}

impl Parsed {
    pub fn format(&self) -> Option<&'static str> {
        match self {
            Parsed::Json(_) => Some("json"),
            Parsed::Yaml(_) => Some("yaml"),
            Parsed::Toml(_) => Some("toml"),
            Parsed::Failed(_) => None,
        }
    }
}

/// Configuration loaded once at startup and handed to each command.
#[derive(Debug, Default)]
pub struct ConfigStore {
    path: PathBuf,
    settings: Settings,
    source: Option<&'static str>,
}

impl ConfigStore {
    /// Parse `text`. A `toml` extension selects TOML; anything else tries JSON, then YAML.
    pub fn parse(text: &str, extension: Option<&str>) -> Parsed {
        if extension.is_some_and(|e| e.eq_ignore_ascii_case("toml")) {
            return match toml::from_str(text) {
                Ok(settings) => Parsed::Toml(settings),
                Err(e) => Parsed::Failed(format!("toml: {e}")),
            };
        }

        let json_err = match serde_json::from_str(text) {
            Ok(settings) => return Parsed::Json(settings),
            Err(e) => e,
        };
        match serde_yaml::from_str(text) {
            Ok(settings) => Parsed::Yaml(settings),
            Err(yaml_err) => Parsed::Failed(format!("json: {json_err}; yaml: {yaml_err}")),
        }
    }

    /// Read and parse the file at `path`.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ConfigReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let extension = path.extension().and_then(|e| e.to_str());

        let parsed = Self::parse(&text, extension);
        let source = parsed.format();
        let settings = match parsed {
            Parsed::Json(s) | Parsed::Yaml(s) | Parsed::Toml(s) => s,
            Parsed::Failed(message) => {
                return Err(ConfigError::ConfigParseFailed {
                    path: path.to_path_buf(),
                    message,
                })
            }
        };

        tracing::debug!(
            path = %path.display(),
            format = source.unwrap_or("unknown"),
            people = settings.person.len(),
            "configuration loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            settings,
            source,
        })
    }

    /// Best-effort load: read or parse failures are logged and leave the configuration empty.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(error = %ErrorChain(&e), "configuration unavailable; continuing with empty configuration");
                Self {
                    path: path.to_path_buf(),
                    ..Self::default()
                }
            }
        }
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format that accepted the file, `None` when nothing was loaded.
    pub fn source(&self) -> Option<&'static str> {
        self.source
    }

    /// Dataset root from `general.directory`, resolved against the configuration file's directory.
    pub fn directory(&self) -> Result<PathBuf, ConfigError> {
        let directory = self
            .settings
            .general
            .directory
            .as_ref()
            .ok_or(ConfigError::MissingKey("general.directory"))?;
        if directory.is_absolute() {
            return Ok(directory.clone());
        }
        let base = self.path.parent().unwrap_or_else(|| Path::new(""));
        Ok(base.join(directory))
    }

    pub fn person(&self, nick: &str) -> Option<&Person> {
        self.settings.person.iter().find(|p| p.nick == nick)
    }

    /// Nicks of all configured people, in file order.
    pub fn nicks(&self) -> Vec<String> {
        self.settings.person.iter().map(|p| p.nick.clone()).collect()
    }
}

/// Display adapter rendering an error followed by its sources.
pub struct ErrorChain<'a>(pub &'a (dyn std::error::Error + 'static));

impl std::fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}
