use config::{Config, File, FileFormat, ValueKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(thiserror::Error, Debug)]
pub enum DesConfigError {
    #[error("invalid configuration")]
    InvalidConfigError(#[from] config::ConfigError),
    #[error("could not find config file {0}")]
    ConfigFileNotFound(String),
    #[error("could not read config file")]
    ReadConfigFile(#[from] std::io::Error),
    #[error("database username and password must be set together")]
    IncompleteCredentials,
    #[error("database password is set but empty")]
    EmptyPassword,
    #[error("could not expand placeholders")]
    EnvExpansionError(#[from] ExpandError),
}

#[derive(thiserror::Error, Debug)]
pub enum ExpandError {
    #[error("{placeholder} has no fallback and {var_name} is not set")]
    MissingVariable {
        var_name: String,
        placeholder: String,
    },
}

/// Loads `.env` from the working directory, or failing that from its parent.
///
/// Call before parsing the config file so that `${VAR}` placeholders can
/// refer to variables defined there. A missing file is not an error.
pub fn load_dotenv() {
    for candidate in [".env", "../.env"] {
        if !Path::new(candidate).exists() {
            continue;
        }
        match dotenvy::from_path(candidate) {
            Ok(()) => info!(path = candidate, "loaded environment file"),
            Err(e) => warn!(path = candidate, error = %e, "could not load environment file"),
        }
        return;
    }
    debug!("no .env file, using the process environment");
}

/// Replaces `${NAME}` and `${NAME:-fallback}` placeholders with the value of
/// the environment variable `NAME`. A placeholder without fallback whose
/// variable is unset is an error.
pub fn expand_env_vars(input: &str) -> Result<String, ExpandError> {
    let placeholder =
        Regex::new(r"\$\{([^}:]+)(?::-(.*?))?\}").expect("placeholder pattern is valid");
    let mut missing: Option<ExpandError> = None;

    let expanded = placeholder.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match (env::var(name), caps.get(2)) {
            (Ok(value), _) => {
                debug!(variable = name, "expanded placeholder");
                value
            }
            (Err(_), Some(fallback)) => {
                warn!(variable = name, "variable unset, using the placeholder fallback");
                fallback.as_str().to_string()
            }
            (Err(_), None) => {
                missing.get_or_insert_with(|| ExpandError::MissingVariable {
                    var_name: name.to_string(),
                    placeholder: caps[0].to_string(),
                });
                String::new()
            }
        }
    });

    match missing {
        Some(err) => Err(err),
        None => Ok(expanded.into_owned()),
    }
}

/// Parse YAML configuration text after environment variable expansion
pub fn load_config_str(content: &str) -> Result<Config, DesConfigError> {
    let expanded_content = expand_env_vars(content)?;
    let conf = Config::builder()
        .add_source(File::from_str(&expanded_content, FileFormat::Yaml))
        .build()?;
    Ok(conf)
}

/// Reads a YAML config file and expands its placeholders
pub fn load_config(filepath: &str) -> Result<Config, DesConfigError> {
    let path = Path::new(filepath);

    if !path.exists() {
        return Err(DesConfigError::ConfigFileNotFound(filepath.to_string()));
    }

    let file_content = std::fs::read_to_string(path)?;
    load_config_str(&file_content)
}

/// Reads an optional string entry, treating an explicit YAML null as absent
fn optional_string(
    table: &config::Map<String, config::Value>,
    key: &str,
) -> Result<Option<String>, config::ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) if matches!(value.kind, ValueKind::Nil) => Ok(None),
        Some(value) => value.clone().into_string().map(Some),
    }
}

/// Configuration for the database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_config(config: &Config) -> Result<Self, DesConfigError> {
        let db_conf = config.get_table("database")?;

        let host = db_conf
            .get("host")
            .map(|h| h.clone().into_string())
            .transpose()?
            .unwrap_or_else(|| "localhost".to_string());

        let port = db_conf
            .get("port")
            .map(|p| p.clone().into_int())
            .transpose()?
            .map(|p| p as u16)
            .unwrap_or(5432);

        let name = db_conf
            .get("name")
            .map(|n| n.clone().into_string())
            .transpose()?
            .unwrap_or_else(|| "desoper".to_string());

        let max_connections = db_conf
            .get("max_connections")
            .map(|mc| mc.clone().into_int())
            .transpose()?
            .map(|mc| mc as u32)
            .unwrap_or(1);

        let username = optional_string(&db_conf, "username")?;
        let password = optional_string(&db_conf, "password")?;

        match (&username, &password) {
            (Some(_), None) | (None, Some(_)) => return Err(DesConfigError::IncompleteCredentials),
            (Some(_), Some(pass)) if pass.is_empty() => return Err(DesConfigError::EmptyPassword),
            _ => {}
        }

        Ok(DatabaseConfig {
            name,
            host,
            port,
            username,
            password,
            max_connections,
        })
    }

    /// Connection URL for the postgres driver
    pub fn url(&self) -> String {
        let mut uri = "postgres://".to_string();

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            uri.push_str(username);
            uri.push(':');
            uri.push_str(password);
            uri.push('@');
        }

        uri.push_str(&self.host);
        uri.push(':');
        uri.push_str(&self.port.to_string());
        uri.push('/');
        uri.push_str(&self.name);

        uri
    }
}

/// Physical names of the survey tables. Every entry can be overridden
/// from the `tables` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TablesConfig {
    pub candidates: String,
    pub galaxies: String,
    pub images: String,
    pub snobs: String,
    pub snforce: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        TablesConfig {
            candidates: "snCand".to_string(),
            galaxies: "snGals".to_string(),
            images: "snImage".to_string(),
            snobs: "snObs".to_string(),
            snforce: "snForce".to_string(),
        }
    }
}

impl TablesConfig {
    pub fn from_config(config: &Config) -> Result<Self, DesConfigError> {
        let mut tables = TablesConfig::default();
        let tables_conf = match config.get_table("tables") {
            Ok(t) => t,
            Err(config::ConfigError::NotFound(_)) => return Ok(tables),
            Err(e) => return Err(e.into()),
        };

        for (key, slot) in [
            ("candidates", &mut tables.candidates),
            ("galaxies", &mut tables.galaxies),
            ("images", &mut tables.images),
            ("snobs", &mut tables.snobs),
            ("snforce", &mut tables.snforce),
        ] {
            if let Some(value) = tables_conf.get(key) {
                *slot = value.clone().into_string()?;
            }
        }

        Ok(tables)
    }
}

/// Everything the export programs read from the config file
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub tables: TablesConfig,
}

impl AppConfig {
    pub fn from_path(config_path: &str) -> Result<Self, DesConfigError> {
        let config = load_config(config_path)?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self, DesConfigError> {
        let database = DatabaseConfig::from_config(config)?;
        let tables = TablesConfig::from_config(config)?;
        Ok(AppConfig { database, tables })
    }
}
