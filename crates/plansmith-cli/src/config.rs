//! Configuration file management for plansmith.
//!
//! A TOML file at `~/.config/plansmith/config.toml` plus a resolution
//! chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use plansmith_core::service::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use plansmith_core::turn::DEFAULT_MAX_RESEARCH_STEPS;
use plansmith_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub completion: CompletionSection,
    pub store: StoreSection,
    pub database: DatabaseSection,
    pub turn: TurnSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSection {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// `file`, `postgres` or `memory`.
    pub backend: Option<String>,
    /// Session file for the `file` backend.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnSection {
    pub max_research_steps: Option<u32>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    if let Ok(dir) = std::env::var(var) {
        return PathBuf::from(dir).join("plansmith");
    }
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    for part in fallback {
        path.push(part);
    }
    path.join("plansmith")
}

/// `$XDG_CONFIG_HOME/plansmith` or `~/.config/plansmith`.
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", &[".config"])
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default session file: `$XDG_DATA_HOME/plansmith/sessions.json` or
/// `~/.local/share/plansmith/sessions.json`.
pub fn default_sessions_path() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", &[".local", "share"]).join("sessions.json")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).context("failed to parse config file")
}

/// Serialize and write the config file, creating parent dirs as needed.
/// The file may hold an API key, so it is written with mode 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    File(PathBuf),
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
}

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub database_url: Option<String>,
    pub store: Option<String>,
    pub model: Option<String>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct PlansmithConfig {
    pub db_config: DbConfig,
    pub store: StoreBackend,
    pub completion: CompletionSettings,
    pub max_research_steps: u32,
}

impl PlansmithConfig {
    /// Resolve against the process environment and the config file, if any.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let file = load_config().ok();
        Self::resolve_with(cli, |key| std::env::var(key).ok(), file.as_ref())
    }

    /// Resolution chain: CLI flag > env var > config file > default.
    pub fn resolve_with(
        cli: &CliOverrides,
        env: impl Fn(&str) -> Option<String>,
        file: Option<&ConfigFile>,
    ) -> Result<Self> {
        let pick = |flag: Option<&String>, vars: &[&str], from_file: Option<&String>| {
            flag.cloned()
                .or_else(|| vars.iter().find_map(|&v| env(v)))
                .or_else(|| from_file.cloned())
        };

        let db_url = pick(
            cli.database_url.as_ref(),
            &[DbConfig::ENV_VAR],
            file.and_then(|f| f.database.url.as_ref()),
        )
        .unwrap_or_else(|| DbConfig::DEFAULT_URL.to_string());

        let backend = pick(
            cli.store.as_ref(),
            &["PLANSMITH_STORE"],
            file.and_then(|f| f.store.backend.as_ref()),
        );
        let store = match backend.as_deref().unwrap_or("file") {
            "file" => StoreBackend::File(
                file.and_then(|f| f.store.path.clone())
                    .unwrap_or_else(default_sessions_path),
            ),
            "postgres" | "pg" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => bail!("unknown store backend {other:?}; expected file, postgres or memory"),
        };

        let completion = CompletionSettings {
            base_url: pick(
                None,
                &["PLANSMITH_BASE_URL"],
                file.and_then(|f| f.completion.base_url.as_ref()),
            )
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: pick(
                cli.model.as_ref(),
                &["PLANSMITH_MODEL"],
                file.and_then(|f| f.completion.model.as_ref()),
            )
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: pick(
                None,
                &["PLANSMITH_API_KEY", "OPENAI_API_KEY"],
                file.and_then(|f| f.completion.api_key.as_ref()),
            ),
            temperature: file.and_then(|f| f.completion.temperature),
        };

        let max_research_steps = file
            .and_then(|f| f.turn.max_research_steps)
            .unwrap_or(DEFAULT_MAX_RESEARCH_STEPS);

        Ok(Self {
            db_config: DbConfig::new(db_url),
            store,
            completion,
            max_research_steps,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
