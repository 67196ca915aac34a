use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SCHEMA: &str = "PUBLIC";
pub const DEFAULT_TOKEN_TYPE: &str = "PROGRAMMATIC_ACCESS_TOKEN";

/// Connection and app settings. Empty strings mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub account: String,
    pub user: String,
    pub token: String,
    pub token_type: String,
    pub host: String,
    pub database: String,
    pub schema: String,
    pub warehouse: String,
    pub role: String,
    pub context: String,
    pub debug: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    base: Config,
    #[serde(default)]
    contexts: BTreeMap<String, Config>,
}

impl Config {
    /// Non-empty values from `overrides` win; `debug` can only be switched on.
    pub fn merge_overrides(mut self, overrides: &Config) -> Self {
        let fields = [
            (&mut self.account, &overrides.account),
            (&mut self.user, &overrides.user),
            (&mut self.token, &overrides.token),
            (&mut self.token_type, &overrides.token_type),
            (&mut self.host, &overrides.host),
            (&mut self.database, &overrides.database),
            (&mut self.schema, &overrides.schema),
            (&mut self.warehouse, &overrides.warehouse),
            (&mut self.role, &overrides.role),
            (&mut self.context, &overrides.context),
        ];
        for (target, value) in fields {
            if !value.trim().is_empty() {
                *target = value.trim().to_string();
            }
        }
        self.debug |= overrides.debug;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.trim().is_empty() {
            bail!("account is required (--account or SNOWFLAKE_ACCOUNT)");
        }
        if self.user.trim().is_empty() {
            bail!("user is required (--user or SNOWFLAKE_USER)");
        }
        if self.token.trim().is_empty() {
            bail!("token is required (--token or SNOWFLAKE_TOKEN)");
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.is_empty() {
            return format!("https://{}.snowflakecomputing.com", self.account.trim());
        }
        if host.starts_with("http://") || host.starts_with("https://") {
            return host.to_string();
        }
        format!("https://{host}")
    }

    /// "DB.SCHEMA", or just the schema when no database is set.
    pub fn context_label(&self) -> String {
        if self.database.is_empty() {
            return self.schema.clone();
        }
        format!("{}.{}", self.database, self.schema)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        let fields = [
            ("SNOWFLAKE_ACCOUNT", &mut self.account),
            ("SNOWFLAKE_USER", &mut self.user),
            ("SNOWFLAKE_TOKEN", &mut self.token),
            ("SNOWFLAKE_TOKEN_TYPE", &mut self.token_type),
            ("SNOWFLAKE_HOST", &mut self.host),
            ("SNOWFLAKE_DATABASE", &mut self.database),
            ("SNOWFLAKE_SCHEMA", &mut self.schema),
            ("SNOWFLAKE_WAREHOUSE", &mut self.warehouse),
            ("SNOWFLAKE_ROLE", &mut self.role),
        ];
        for (key, target) in fields {
            if let Some(value) = env(key).filter(|value| !value.trim().is_empty()) {
                *target = value.trim().to_string();
            }
        }
        if let Some(value) = env("SNOWFLAKE_DEBUG") {
            self.debug = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    fn apply_defaults(&mut self) {
        if self.schema.trim().is_empty() {
            self.schema = DEFAULT_SCHEMA.to_string();
        }
        if self.token_type.trim().is_empty() {
            self.token_type = DEFAULT_TOKEN_TYPE.to_string();
        }
    }
}

/// Reads the config file and environment. CLI overrides and validation are left to the caller.
pub fn load(context: Option<&str>) -> Result<Config> {
    let path = discover_config_path();
    let raw = match path.as_deref().filter(|path| path.exists()) {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
        ),
        None => None,
    };

    let env_file = path
        .as_deref()
        .and_then(Path::parent)
        .map(|dir| dir.join("env"))
        .and_then(|env_path| fs::read_to_string(env_path).ok())
        .map(|raw| parse_env_file(&raw))
        .unwrap_or_default();

    let lookup = |key: &str| {
        std::env::var(key)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| env_file.get(key).cloned())
    };
    resolve(raw.as_deref(), lookup, context)
}

/// Builds a config from file contents and an environment lookup. The process environment
/// overrides the file; a named context replaces the file's top-level values.
pub fn resolve(
    raw: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    context: Option<&str>,
) -> Result<Config> {
    let parsed = match raw {
        Some(raw) if !raw.trim().is_empty() => {
            serde_yaml::from_str::<ConfigFile>(raw).context("failed to parse config file")?
        }
        _ => ConfigFile::default(),
    };

    let context_name = context
        .map(str::to_string)
        .or_else(|| env("SNOWFLAKE_CONTEXT"))
        .filter(|name| !name.trim().is_empty())
        .or_else(|| Some(parsed.base.context.clone()).filter(|name| !name.trim().is_empty()));

    let mut config = match context_name {
        Some(name) => {
            let mut selected = parsed
                .contexts
                .get(name.trim())
                .cloned()
                .with_context(|| format!("context {name:?} not found in config"))?;
            selected.context = name.trim().to_string();
            selected
        }
        None => parsed.base,
    };

    config.apply_env(&env);
    config.apply_defaults();
    Ok(config)
}

/// `KEY=value` lines; blanks, comments and empty values are skipped.
pub fn parse_env_file(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"')))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FLOE_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    if let Ok(home) = std::env::var("HOME")
        && !home.trim().is_empty()
    {
        return Some(PathBuf::from(home).join(".floe").join("config.yaml"));
    }

    None
}
