use bbs_uploader::load_config::{layer_env, load_config, local_env};
use bbs_uploader_core::config::{EnvMap, FileSourceKind, Mode, Settings};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

/// Scalars of every YAML type come back in the string form the settings parser reads.
#[test]
fn test_load_config_stringifies_scalars() {
    let config_file = config_file(
        r#"
MODE: multi_user
MULTI_USER_CSV: https://drive.google.com/file/d/abc123/view?usp=sharing
MAX_TRIES: 5
VERBOSE: true
ROTATE_IP: false
AWS_S3_BUCKET: ~
"#,
    );

    let vars = load_config(config_file.path()).expect("Config should load");

    assert_eq!(vars.get("MODE").map(String::as_str), Some("multi_user"));
    assert_eq!(vars.get("MAX_TRIES").map(String::as_str), Some("5"));
    assert_eq!(vars.get("VERBOSE").map(String::as_str), Some("1"));
    assert_eq!(vars.get("ROTATE_IP").map(String::as_str), Some("0"));
    assert!(!vars.contains_key("AWS_S3_BUCKET"), "null drops the key");
}

#[test]
fn test_load_config_rejects_nested_values() {
    let config_file = config_file("MODE:\n  - single_user\n  - multi_user\n");
    let err = load_config(config_file.path()).unwrap_err();
    assert!(err.to_string().contains("MODE"), "{err}");
}

#[test]
fn test_load_config_empty_file_is_empty_map() {
    let config_file = config_file("");
    assert!(load_config(config_file.path()).unwrap().is_empty());
}

#[test]
fn test_load_config_errors_on_invalid_yaml() {
    let config_file = config_file("MODE: [unterminated\n");
    let err = load_config(config_file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}

#[test]
fn test_environment_wins_over_file() {
    let mut file = EnvMap::new();
    file.insert("MODE".into(), "multi_user".into());
    file.insert("FILE_SOURCE".into(), "local".into());

    let merged = layer_env(file, vec![("MODE".to_string(), "single_user".to_string())]);

    assert_eq!(merged["MODE"], "single_user");
    assert_eq!(merged["FILE_SOURCE"], "local");
}

#[test]
#[serial]
fn test_local_env_resolves_settings_from_file_and_process_env() {
    let config_file = config_file(
        "MODE: single_user\nFILE_SOURCE: s3\nSINGLE_USER_CSV: from-file.csv\nWEBDRIVER_TIMEOUT_SECONDS: 20\n",
    );
    env::set_var("SINGLE_USER_CSV", "from-env.csv");
    env::remove_var("MODE");
    env::remove_var("FILE_SOURCE");
    env::remove_var("WEBDRIVER_TIMEOUT_SECONDS");

    let vars = local_env(Some(config_file.path())).expect("env should layer");
    let settings = Settings::resolve(&vars, &serde_json::json!({})).unwrap();
    env::remove_var("SINGLE_USER_CSV");

    assert_eq!(settings.mode, Mode::SingleUser);
    assert_eq!(settings.file_source, FileSourceKind::S3);
    assert_eq!(settings.single_user_csv.as_deref(), Some("from-env.csv"));
    assert_eq!(settings.webdriver_timeout, Duration::from_secs(20));
}
