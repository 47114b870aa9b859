//! Layered TOML configuration for the website availability monitor.
//!
//! Loading mirrors `mqk-config`'s deep-merge idiom: a set of built-in
//! defaults is deep-merged with the user's TOML file, then canonicalized and
//! hashed so two processes can confirm they're running from the same
//! configuration by comparing a short hash in their logs. Environment
//! variables of the form `WALT_<KEY>` / `WALT_<SECTION>_<KEY>` override any
//! scalar leaf afterwards; keys ending in `_map` or `_list` are never merged
//! or overridden field-by-field — they're replaced wholesale.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

const ENV_PREFIX: &str = "WALT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KafkaConfig {
    pub uri: String,
    pub topic: String,
    #[serde(default)]
    pub cafile: String,
    #[serde(default)]
    pub certfile: String,
    #[serde(default)]
    pub keyfile: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            uri: "localhost:9092".to_string(),
            topic: "walt".to_string(),
            cafile: String::new(),
            certfile: String::new(),
            keyfile: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "mysecretpassword".to_string(),
            dbname: "walt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub log_level: String,
    pub concurrent: u32,
    pub interval: u64,
    pub timeout: u64,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub url_map: BTreeMap<String, String>,
    pub kafka: KafkaConfig,
    pub postgres: PostgresConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Pragma".to_string(), "no-cache".to_string());

        let mut url_map = BTreeMap::new();
        url_map.insert("http://localhost:8080/path_1".to_string(), r"\w{,5}".to_string());
        url_map.insert("http://localhost:8080/path_2".to_string(), r"\w{6,}".to_string());
        url_map.insert("http://localhost:8080/path_3".to_string(), String::new());
        url_map.insert("http://localhost:8080".to_string(), String::new());

        Self {
            log_level: "INFO".to_string(),
            concurrent: 2,
            interval: 2,
            timeout: 30,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            headers,
            url_map,
            kafka: KafkaConfig::default(),
            postgres: PostgresConfig::default(),
        }
    }
}

/// The fully loaded configuration, plus its canonical-form hash.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

/// Loads configuration from `path`, deep-merged onto the built-in defaults.
///
/// Unreadable or malformed files are logged and the defaults are returned
/// unmerged — this function never fails outright, matching the "recover
/// locally" policy for config-file errors.
pub fn load(path: Option<&Path>) -> LoadedConfig {
    let mut merged = defaults_as_value();

    if let Some(path) = path {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<toml::Value>(&text) {
                Ok(toml_val) => match serde_json::to_value(toml_val) {
                    Ok(json_val) => deep_merge(&mut merged, json_val),
                    Err(e) => tracing::error!("[config] could not convert {}: {}", path.display(), e),
                },
                Err(e) => tracing::error!("[config] could not parse {}: {}", path.display(), e),
            },
            Err(e) => tracing::error!("[config] could not load from {}: {}", path.display(), e),
        }
    }

    finish(merged)
}

/// Overrides scalar leaves of `cfg` from the process environment, using the
/// `WALT_<KEY>` / `WALT_<SECTION>_<KEY>` naming convention. Keys ending in
/// `_map` or `_list` are skipped.
pub fn override_from_env(config: &Config) -> Config {
    let mut value = serde_json::to_value(config).expect("Config always serializes");
    override_from(&mut value, ENV_PREFIX, |k| std::env::var(k).ok());
    serde_json::from_value(value).expect("override_from preserves the schema")
}

fn override_from(value: &mut Value, namespace: &str, lookup: impl Fn(&str) -> Option<String> + Copy) {
    let Value::Object(map) = value else { return };
    for (key, v) in map.iter_mut() {
        if key.ends_with("_list") || key.ends_with("_map") {
            continue;
        }
        let var_name = format!("{namespace}_{key}").to_ascii_uppercase();
        if v.is_object() {
            override_from(v, &var_name, lookup);
        } else if let Some(raw) = lookup(&var_name) {
            *v = coerce_like(v, &raw);
        }
    }
}

/// Parses `raw` into the same JSON type as `existing` so overriding an
/// integer or boolean field with an env var (itself always a string) doesn't
/// turn it into a string.
fn coerce_like(existing: &Value, raw: &str) -> Value {
    match existing {
        Value::Number(_) => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Value::Bool(_) => raw
            .parse::<bool>()
            .map(Value::Bool)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

/// Deep-merge: objects merge recursively; any key ending in `_map` is
/// replaced wholesale rather than merged; everything else is overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                if k.ends_with("_map") {
                    dst_map.insert(k, v);
                    continue;
                }
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => *dst_slot = src_val,
    }
}

fn finish(merged: Value) -> LoadedConfig {
    let config: Config = serde_json::from_value(merged.clone()).unwrap_or_else(|e| {
        tracing::error!("[config] merged configuration did not match schema: {}", e);
        Config::default()
    });
    LoadedConfig {
        config_hash: config_hash(&merged),
        config,
    }
}

fn defaults_as_value() -> Value {
    serde_json::to_value(Config::default()).expect("Config::default always serializes")
}

/// SHA-256 of the canonicalized (key-sorted, compact) JSON form of `value`.
pub fn config_hash(value: &Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).expect("json serialization must not fail")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Renders `config` as a TOML document, for the `generate-config-sample`
/// and `generate-config-sample-from-env` actions.
pub fn to_toml_string(config: &Config) -> String {
    toml::to_string_pretty(config).expect("Config always serializes to TOML")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_round_trip_through_value() {
        let cfg = Config::default();
        let value = serde_json::to_value(&cfg).unwrap();
        let back: Config = serde_json::from_value(value).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn load_with_no_path_returns_defaults() {
        let loaded = load(None);
        assert_eq!(loaded.config, Config::default());
    }

    #[test]
    fn load_merges_scalars_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrent = 9\n[postgres]\nhost = \"db.internal\"").unwrap();
        let loaded = load(Some(file.path()));
        assert_eq!(loaded.config.concurrent, 9);
        assert_eq!(loaded.config.postgres.host, "db.internal");
        assert_eq!(loaded.config.postgres.port, 5432, "untouched fields survive the merge");
    }

    #[test]
    fn load_replaces_url_map_wholesale_not_merged() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[url_map]\n\"https://example.com\" = \"\"").unwrap();
        let loaded = load(Some(file.path()));
        assert_eq!(loaded.config.url_map.len(), 1);
        assert!(loaded.config.url_map.contains_key("https://example.com"));
    }

    #[test]
    fn load_unreadable_file_falls_back_to_defaults() {
        let loaded = load(Some(Path::new("/nonexistent/path/does-not-exist.toml")));
        assert_eq!(loaded.config, Config::default());
    }

    #[test]
    fn load_malformed_toml_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not [ valid toml").unwrap();
        let loaded = load(Some(file.path()));
        assert_eq!(loaded.config, Config::default());
    }

    #[test]
    fn override_from_env_overrides_top_level_scalar() {
        std::env::set_var("WALT_CONCURRENT", "7");
        let cfg = override_from_env(&Config::default());
        std::env::remove_var("WALT_CONCURRENT");
        assert_eq!(cfg.concurrent, 7);
    }

    #[test]
    fn override_from_env_overrides_nested_scalar() {
        std::env::set_var("WALT_POSTGRES_HOST", "override.example");
        let cfg = override_from_env(&Config::default());
        std::env::remove_var("WALT_POSTGRES_HOST");
        assert_eq!(cfg.postgres.host, "override.example");
    }

    #[test]
    fn override_from_env_never_touches_map_keys() {
        std::env::set_var("WALT_URL_MAP", "ignored");
        let cfg = override_from_env(&Config::default());
        std::env::remove_var("WALT_URL_MAP");
        assert_eq!(cfg.url_map, Config::default().url_map);
    }

    #[test]
    fn config_hash_is_stable_across_key_order() {
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn to_toml_string_round_trips() {
        let cfg = Config::default();
        let toml_str = to_toml_string(&cfg);
        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg, reparsed);
    }
}
