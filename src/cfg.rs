use std::{env, net::SocketAddr, str::FromStr};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_PUSH_TTL_SECONDS: u32 = 60;
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 32;

/// Where subscriptions are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Supabase { url: Url, anon_key: String },
    Backend { url: Url },
}

impl StoreConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Supabase { .. } => "supabase",
            StoreConfig::Backend { .. } => "backend",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub vapid: VapidConfig,
    pub push_ttl_seconds: u32,
    pub max_concurrent_deliveries: usize,
    pub store: StoreConfig,
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let bind_addr: SocketAddr =
            parse_or(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?;
        let push_ttl_seconds =
            parse_or(&lookup, "PUSH_TTL_SECONDS", Some(DEFAULT_PUSH_TTL_SECONDS))?;
        let max_concurrent_deliveries = parse_or(
            &lookup,
            "MAX_CONCURRENT_DELIVERIES",
            Some(DEFAULT_MAX_CONCURRENT_DELIVERIES),
        )?;
        if max_concurrent_deliveries == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_DELIVERIES",
                reason: "must be at least 1".to_string(),
            });
        }

        let vapid = VapidConfig {
            public_key: required("VAPID_PUBLIC_KEY")?,
            private_key: required("VAPID_PRIVATE_KEY")?,
            subject: required("VAPID_SUBJECT")?,
        };
        validate_vapid(&vapid)?;

        let store = match lookup("SUBSCRIPTION_STORE").as_deref().unwrap_or("memory") {
            "memory" => StoreConfig::Memory,
            "supabase" => StoreConfig::Supabase {
                url: parse_url("SUPABASE_URL", &required("SUPABASE_URL")?)?,
                anon_key: required("SUPABASE_ANON_KEY")?,
            },
            "backend" => StoreConfig::Backend {
                url: parse_url("BACKEND_URL", &required("BACKEND_URL")?)?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "SUBSCRIPTION_STORE",
                    reason: format!("unknown store `{other}`, expected memory, supabase or backend"),
                });
            }
        };

        Ok(Config {
            bind_addr,
            vapid,
            push_ttl_seconds,
            max_concurrent_deliveries,
            store,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => default.ok_or(ConfigError::Missing(key)),
    }
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn validate_vapid(vapid: &VapidConfig) -> Result<(), ConfigError> {
    let pub_bytes = URL_SAFE_NO_PAD
        .decode(vapid.public_key.trim_end_matches('='))
        .map_err(|e| ConfigError::Invalid {
            key: "VAPID_PUBLIC_KEY",
            reason: e.to_string(),
        })?;
    // uncompressed P-256 point
    if pub_bytes.len() != 65 || pub_bytes[0] != 0x04 {
        return Err(ConfigError::Invalid {
            key: "VAPID_PUBLIC_KEY",
            reason: "must be a 65-byte uncompressed P-256 point".to_string(),
        });
    }

    let priv_bytes = URL_SAFE_NO_PAD
        .decode(vapid.private_key.trim_end_matches('='))
        .map_err(|e| ConfigError::Invalid {
            key: "VAPID_PRIVATE_KEY",
            reason: e.to_string(),
        })?;
    if priv_bytes.len() != 32 {
        return Err(ConfigError::Invalid {
            key: "VAPID_PRIVATE_KEY",
            reason: "must be a raw 32-byte P-256 scalar".to_string(),
        });
    }

    if !(vapid.subject.starts_with("mailto:") || vapid.subject.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            key: "VAPID_SUBJECT",
            reason: "must be a mailto: or https:// URI".to_string(),
        });
    }
    Ok(())
}
