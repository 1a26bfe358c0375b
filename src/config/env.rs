//! Environment variable parsing helpers.
//!
//! Configuration is loaded from `.env` (if present) plus the process
//! environment. Real environment variables win over `.env` values, which is
//! the dotenvy default.

use std::collections::BTreeMap;
use std::env;

use anyhow::{Context, Result};

pub fn get_env_str(name: &str, fallback: &str) -> String {
    env::var(name).unwrap_or_else(|_| fallback.to_string())
}

pub fn get_env_optional(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

pub fn get_env_required(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("{name} is required"))?;
    if value.is_empty() {
        anyhow::bail!("{name} is required");
    }
    Ok(value)
}

pub fn get_env_bool(name: &str, fallback: bool) -> bool {
    match env::var(name) {
        Ok(value) => value.to_lowercase() == "true",
        Err(_) => fallback,
    }
}

pub fn get_env_parse<T>(name: &str, fallback: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value: {value}")),
        Err(_) => Ok(fallback),
    }
}

/// Parse a comma-separated list, trimming entries and dropping empties.
pub fn get_env_csv(name: &str) -> Vec<String> {
    env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a JSON object of `name -> priority` pairs, e.g. `CODECS_PRIORITY`.
pub fn get_env_json_map(name: &str, fallback: BTreeMap<String, i32>) -> Result<BTreeMap<String, i32>> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => {
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{name} is not valid JSON"))?;
            let object = value
                .as_object()
                .with_context(|| format!("{name} must be a JSON object"))?;
            let mut result = BTreeMap::new();
            for (key, entry) in object {
                let priority = entry
                    .as_i64()
                    .with_context(|| format!("{name}[{key}] must be an integer"))?;
                result.insert(key.clone(), priority as i32);
            }
            Ok(result)
        }
        _ => Ok(fallback),
    }
}
