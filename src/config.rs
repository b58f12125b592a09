//! Settings file and root parameters
//!
//! Settings live in `<config dir>/keel/config.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:4774"
//!
//! [client]
//! rpc_addr = "http://127.0.0.1:4774"
//!
//! [params]
//! user = "deploy"
//! ```
//!
//! A missing file means defaults. Parameters are layered, lowest first:
//! `[params]`, `--paramsJSON`, then each `--params key=value`.

use anyhow::{Context, Result, bail};
use declarative::Params;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Address the server binds to by default
pub const DEFAULT_BIND: &str = "127.0.0.1:4774";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerSettings,
    pub client: ClientSettings,
    /// Default values for root parameters
    pub params: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSettings {
    /// Run plan, apply and healthcheck on this server
    pub rpc_addr: Option<String>,
}

/// Default settings path
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("keel").join("config.toml"))
}

impl Settings {
    /// Load settings from `explicit`, or from the default path
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit.map(Path::to_path_buf).or_else(default_path) {
            Some(path) => Self::from_file(&path),
            None => {
                log::debug!("no config directory, using default settings");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let path = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
        if !path.exists() {
            log::debug!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let settings =
            toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))?;
        log::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Server address for remote runs, the flag winning over the file
    pub fn rpc_addr<'a>(&'a self, flag: Option<&'a str>) -> Option<&'a str> {
        flag.or(self.client.rpc_addr.as_deref())
    }
}

/// Layer root parameters from every source
pub fn merge_params(defaults: &toml::Table, json: Option<&str>, pairs: &[String]) -> Result<Params> {
    let mut params = match serde_json::to_value(defaults).context("Invalid [params] table")? {
        serde_json::Value::Object(map) => map,
        _ => Params::new(),
    };

    if let Some(json) = json {
        let value: serde_json::Value =
            serde_json::from_str(json).context("Invalid --paramsJSON value")?;
        let serde_json::Value::Object(map) = value else {
            bail!("--paramsJSON must be a JSON object");
        };
        params.extend(map);
    }

    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid parameter {pair:?}, expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid parameter {pair:?}, the key is empty");
        }
        params.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::from_file(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.server.bind, DEFAULT_BIND);
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[client]\nrpc_addr = \"http://10.0.0.2:4774\"\n\n[params]\nuser = \"deploy\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.server.bind, DEFAULT_BIND);
        assert_eq!(settings.rpc_addr(None), Some("http://10.0.0.2:4774"));
        assert_eq!(settings.rpc_addr(Some("http://other")), Some("http://other"));
        assert_eq!(settings.params["user"].as_str(), Some("deploy"));
    }

    #[test]
    fn test_malformed_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nport = 1\n").unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains(&path.display().to_string()));
    }

    #[test]
    fn test_param_precedence() {
        let mut defaults = toml::Table::new();
        defaults.insert("a".into(), toml::Value::String("file".into()));
        defaults.insert("b".into(), toml::Value::String("file".into()));
        defaults.insert("c".into(), toml::Value::Integer(3));

        let params = merge_params(
            &defaults,
            Some(r#"{"b": "json", "d": [1, 2]}"#),
            &["a=flag".to_string(), "e=x=y".to_string()],
        )
        .unwrap();

        assert_eq!(params["a"], json!("flag"));
        assert_eq!(params["b"], json!("json"));
        assert_eq!(params["c"], json!(3));
        assert_eq!(params["d"], json!([1, 2]));
        assert_eq!(params["e"], json!("x=y"));
    }

    #[test]
    fn test_bad_params() {
        let empty = toml::Table::new();
        assert!(merge_params(&empty, Some("[1]"), &[]).is_err());
        assert!(merge_params(&empty, Some("{"), &[]).is_err());
        assert!(merge_params(&empty, None, &["novalue".to_string()]).is_err());
        assert!(merge_params(&empty, None, &["=x".to_string()]).is_err());
    }
}
