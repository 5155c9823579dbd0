//! Environment configuration. Every setting has a default except the API
//! keys; a missing key disables only the models that need it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::translate::cache::CacheConfig;
use crate::translate::extract::DEFAULT_READER_BASE_URL;
use crate::translate::TranslateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub google_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub reader_api_key: Option<String>,
    pub reader_base_url: String,
    pub glossary_path: PathBuf,
    pub cache: CacheConfig,
    /// `None` disables extended thinking.
    pub thinking_budget: Option<u32>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, TranslateError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TranslateError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port: u16 = parse_or(&get, "PORT", 4321)?;
        let host = get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into());
        let bind_addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|e| TranslateError::Config(format!("BIND_ADDR {host}: {e}")))?;

        let defaults = CacheConfig::default();
        let capacity: usize = parse_or(&get, "CACHE_CAPACITY", defaults.capacity)?;
        if capacity == 0 {
            return Err(TranslateError::Config("CACHE_CAPACITY must be > 0".into()));
        }
        let ttl_secs: u64 = parse_or(&get, "CACHE_TTL_SECS", defaults.ttl.as_secs())?;
        let thinking_budget: u32 = parse_or(&get, "ANTHROPIC_THINKING_BUDGET", 16_000)?;

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(TranslateError::Config(format!("LOG_FORMAT: unknown format {other}")))
            }
        };

        Ok(Self {
            bind_addr,
            google_api_key: get("GOOGLE_GENERATIVE_AI_KEY"),
            anthropic_api_key: get("CLAUDE_AI_KEY"),
            deepseek_api_key: get("DEEPSEEK_API_KEY"),
            reader_api_key: get("JINA_API_KEY"),
            reader_base_url: get("READER_BASE_URL").unwrap_or_else(|| DEFAULT_READER_BASE_URL.into()),
            glossary_path: get("GLOSSARY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("glossary/names.json")),
            cache: CacheConfig {
                capacity,
                ttl: Duration::from_secs(ttl_secs),
                ..defaults
            },
            thinking_budget: (thinking_budget > 0).then_some(thinking_budget),
            log_format,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, TranslateError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| TranslateError::Config(format!("{name}={raw}: {e}"))),
    }
}
