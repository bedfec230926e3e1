use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::pipeline::tool_adapters::{DEFAULT_REMBG_MODEL_VERSION, DEFAULT_REPLICATE_BASE_URL};

pub const DEFAULT_BIND: &str = "127.0.0.1:8790";
const MAX_SESSION_LIFETIME_MINUTES: u64 = 60 * 24 * 365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    DotEnv {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} is not a valid http(s) URL: '{value}'")]
    InvalidUrl { key: &'static str, value: String },
    #[error("IMGTASKS_BIND is not a valid socket address: '{value}'")]
    InvalidBind { value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_root: PathBuf,
    pub bind: SocketAddr,
    /// Without it the optimize operation is not registered.
    pub optimization_base_url: Option<String>,
    pub optimization_api_key: String,
    pub replicate_api_token: String,
    pub replicate_base_url: String,
    pub replicate_model_version: String,
    pub uploads_dir: PathBuf,
    pub temp_files_ttl_hours: u64,
    pub max_upload_size_mb: u64,
    pub session_lifetime_minutes: u64,
}

impl AppConfig {
    /// Process environment wins over `<app_root>/.env`.
    pub fn from_env(app_root: &Path) -> Result<Self, ConfigError> {
        let dotenv = load_dotenv_map(app_root)?;
        Self::from_lookup(app_root, |key| {
            std::env::var(key)
                .ok()
                .or_else(|| dotenv.get(key).cloned())
        })
    }

    pub fn from_lookup(
        app_root: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_raw = get("IMGTASKS_BIND").unwrap_or_else(|| String::from(DEFAULT_BIND));
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidBind { value: bind_raw })?;

        let optimization_base_url = get("IMAGE_OPTIMIZATION_SERVICE_BASE_URL")
            .map(|raw| parse_base_url("IMAGE_OPTIMIZATION_SERVICE_BASE_URL", raw))
            .transpose()?;
        let replicate_base_url = parse_base_url(
            "REPLICATE_API_BASE_URL",
            get("REPLICATE_API_BASE_URL")
                .unwrap_or_else(|| String::from(DEFAULT_REPLICATE_BASE_URL)),
        )?;

        let uploads_raw = PathBuf::from(
            get("TEMP_UPLOADS_DIR").unwrap_or_else(|| String::from("uploads")),
        );
        let uploads_dir = if uploads_raw.is_absolute() {
            uploads_raw
        } else {
            app_root.join(uploads_raw)
        };

        Ok(Self {
            app_root: app_root.to_path_buf(),
            bind,
            optimization_base_url,
            optimization_api_key: get("IMAGE_OPTIMIZATION_API_KEY").unwrap_or_default(),
            replicate_api_token: get("REPLICATE_API_TOKEN").unwrap_or_default(),
            replicate_base_url,
            replicate_model_version: get("REPLICATE_BG_MODEL_VERSION")
                .unwrap_or_else(|| String::from(DEFAULT_REMBG_MODEL_VERSION)),
            uploads_dir,
            temp_files_ttl_hours: parse_number(
                "TEMP_FILES_TTL_HOURS",
                get("TEMP_FILES_TTL_HOURS"),
                24,
            )?,
            max_upload_size_mb: parse_number(
                "MAX_UPLOAD_SIZE_MB",
                get("MAX_UPLOAD_SIZE_MB"),
                25,
            )?,
            session_lifetime_minutes: parse_number(
                "SESSION_LIFETIME_MINUTES",
                get("SESSION_LIFETIME_MINUTES"),
                120,
            )?,
        })
    }

    pub fn temp_files_ttl(&self) -> Duration {
        Duration::from_secs(self.temp_files_ttl_hours.saturating_mul(3600))
    }

    pub fn session_lifetime(&self) -> chrono::Duration {
        let minutes = self.session_lifetime_minutes.min(MAX_SESSION_LIFETIME_MINUTES);
        chrono::Duration::minutes(minutes as i64)
    }
}

fn parse_number(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
    }
}

fn parse_base_url(key: &'static str, raw: String) -> Result<String, ConfigError> {
    match Url::parse(raw.as_str()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            Ok(raw.trim_end_matches('/').to_string())
        }
        _ => Err(ConfigError::InvalidUrl { key, value: raw }),
    }
}

fn load_dotenv_map(app_root: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let path = app_root.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path.as_path())
        .map_err(|source| ConfigError::DotEnv { path, source })?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub(crate) fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut value = line.trim();
        if value.is_empty() || value.starts_with('#') {
            continue;
        }
        if let Some(rest) = value.strip_prefix("export ") {
            value = rest.trim_start();
        }
        let Some((key_raw, value_raw)) = value.split_once('=') else {
            continue;
        };
        let key = key_raw.trim();
        if key.is_empty() {
            continue;
        }
        let raw_value = value_raw.trim();
        let quoted = raw_value.len() >= 2
            && ((raw_value.starts_with('"') && raw_value.ends_with('"'))
                || (raw_value.starts_with('\'') && raw_value.ends_with('\'')));
        let parsed = if quoted {
            &raw_value[1..raw_value.len() - 1]
        } else {
            raw_value
                .split_once(" #")
                .map(|(before, _)| before.trim_end())
                .unwrap_or(raw_value)
        };
        out.insert(key.to_string(), parsed.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = AppConfig::from_lookup(Path::new("/srv/imgtasks"), lookup_from(&[]))
            .expect("defaults should load");
        assert_eq!(config.bind, DEFAULT_BIND.parse::<SocketAddr>().expect("bind"));
        assert_eq!(config.optimization_base_url, None);
        assert_eq!(config.replicate_base_url, "https://api.replicate.com/v1");
        assert_eq!(config.replicate_model_version, DEFAULT_REMBG_MODEL_VERSION);
        assert_eq!(config.uploads_dir, PathBuf::from("/srv/imgtasks/uploads"));
        assert_eq!(config.temp_files_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.max_upload_size_mb, 25);
        assert_eq!(config.session_lifetime(), chrono::Duration::minutes(120));
    }

    #[test]
    fn explicit_values_are_trimmed_and_normalized() {
        let config = AppConfig::from_lookup(
            Path::new("/srv/imgtasks"),
            lookup_from(&[
                ("IMAGE_OPTIMIZATION_SERVICE_BASE_URL", " https://opt.example.com/api/ "),
                ("IMAGE_OPTIMIZATION_API_KEY", "k-1"),
                ("TEMP_UPLOADS_DIR", "/var/tmp/imgtasks"),
                ("TEMP_FILES_TTL_HOURS", "6"),
                ("IMGTASKS_BIND", "0.0.0.0:9000"),
            ]),
        )
        .expect("config should load");
        assert_eq!(
            config.optimization_base_url.as_deref(),
            Some("https://opt.example.com/api")
        );
        assert_eq!(config.optimization_api_key, "k-1");
        assert_eq!(config.uploads_dir, PathBuf::from("/var/tmp/imgtasks"));
        assert_eq!(config.temp_files_ttl_hours, 6);
        assert_eq!(config.bind.port(), 9000);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = AppConfig::from_lookup(
            Path::new("/srv"),
            lookup_from(&[("MAX_UPLOAD_SIZE_MB", "lots")]),
        )
        .expect_err("non-numeric size should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "MAX_UPLOAD_SIZE_MB",
                ..
            }
        ));

        let err = AppConfig::from_lookup(
            Path::new("/srv"),
            lookup_from(&[("IMAGE_OPTIMIZATION_SERVICE_BASE_URL", "ftp://opt")]),
        )
        .expect_err("ftp url should fail");
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));

        let err = AppConfig::from_lookup(Path::new("/srv"), lookup_from(&[("IMGTASKS_BIND", "nope")]))
            .expect_err("bad bind should fail");
        assert!(matches!(err, ConfigError::InvalidBind { .. }));
    }

    #[test]
    fn dotenv_parser_handles_exports_quotes_and_comments() {
        let parsed = parse_dotenv_content(
            "# comment\nexport REPLICATE_API_TOKEN=r8_abc\nIMAGE_OPTIMIZATION_API_KEY=\"quoted # kept\"\nTEMP_FILES_TTL_HOURS=12 # half a day\nbroken line\n=novalue\n",
        );
        assert_eq!(parsed.get("REPLICATE_API_TOKEN").map(String::as_str), Some("r8_abc"));
        assert_eq!(
            parsed.get("IMAGE_OPTIMIZATION_API_KEY").map(String::as_str),
            Some("quoted # kept")
        );
        assert_eq!(parsed.get("TEMP_FILES_TTL_HOURS").map(String::as_str), Some("12"));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn from_env_reads_dotenv_in_app_root() {
        let root = std::env::temp_dir().join(format!(
            "imgtasks_config_{}",
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(root.as_path()).expect("temp root should exist");
        fs::write(
            root.join(".env"),
            "REPLICATE_BG_MODEL_VERSION=custom-version\n",
        )
        .expect(".env should be written");

        let config = AppConfig::from_env(root.as_path()).expect("config should load");
        if std::env::var("REPLICATE_BG_MODEL_VERSION").is_err() {
            assert_eq!(config.replicate_model_version, "custom-version");
        }
        let _ = fs::remove_dir_all(root);
    }
}
