/// `load_config` module: reads an optional YAML file of settings and layers it beneath the
/// process environment.
///
/// The YAML keys are the same variable names the environment uses (`MODE`, `FILE_SOURCE`,
/// `SINGLE_USER_CSV`, ...), so a file can hold the non-secret part of a run and `.env` or
/// the shell can supply passwords. The environment always wins over the file.
///
/// Scalars are stringified the way the settings parser expects them: booleans become
/// `"1"`/`"0"`, numbers their decimal text, `null` drops the key. Nested values are
/// rejected.
///
/// # Errors
/// All errors are `anyhow::Error` with the offending path or key in the message; they
/// surface at the CLI boundary.
use anyhow::{anyhow, Result};
use bbs_uploader_core::config::EnvMap;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Load a YAML settings file into an environment-style map.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EnvMap> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    if config_content.trim().is_empty() {
        info!(config_path = ?path_ref, "Config file is empty");
        return Ok(EnvMap::new());
    }

    let raw: Option<BTreeMap<String, Value>> = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let mut vars = EnvMap::new();
    for (key, value) in raw.unwrap_or_default() {
        match scalar(&value) {
            Some(Ok(text)) => {
                vars.insert(key, text);
            }
            Some(Err(kind)) => {
                error!(key = %key, kind, config_path = ?path_ref, "Unsupported config value");
                return Err(anyhow!("Config key {key} must be a scalar, got a {kind}"));
            }
            None => {}
        }
    }
    info!(keys = vars.len(), "Configuration keys loaded");
    Ok(vars)
}

/// Overlay `env` on top of `file`: a key set in the environment always wins.
pub fn layer_env(file: EnvMap, env: impl IntoIterator<Item = (String, String)>) -> EnvMap {
    let mut merged = file;
    merged.extend(env);
    merged
}

/// Settings source for a local run: the YAML file (if any) beneath the real environment.
pub fn local_env(config: Option<&Path>) -> Result<EnvMap> {
    let file = match config {
        Some(path) => load_config(path)?,
        None => EnvMap::new(),
    };
    Ok(layer_env(file, std::env::vars()))
}

fn scalar(value: &Value) -> Option<std::result::Result<String, &'static str>> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Ok(if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => Some(Ok(n.to_string())),
        Value::String(s) => Some(Ok(s.clone())),
        Value::Sequence(_) => Some(Err("sequence")),
        Value::Mapping(_) => Some(Err("mapping")),
        Value::Tagged(_) => Some(Err("tagged value")),
    }
}
