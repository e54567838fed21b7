use std::{env, str::FromStr};

/// Reads a trimmed, non-empty environment variable.
pub fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse::<T>().ok())
}

pub fn env_bool(key: &str) -> bool {
    env_string(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
