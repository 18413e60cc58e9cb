use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn lifestream_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lifestream"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/lifestream.sqlite"

[sync]
providers = ["providers.*"]

[providers.twitter]
username = "jacob"

[providers.lastfm]
username = "jacobian"

[providers.pownce]
username = "jacob"

[providers.flickr]
api_key = "key"
"#,
        root.display()
    );

    let config_path = config_dir.join("lifestream.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lifestream(config_path: &Path, args: &[&str]) -> Output {
    Command::new(lifestream_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute lifestream binary")
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let output = run_lifestream(&config_path, &["init"]);
    assert!(
        output.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(tmp.path().join("data/lifestream.sqlite").exists());
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    assert!(run_lifestream(&config_path, &["init"]).status.success());
    let output = run_lifestream(&config_path, &["init"]);
    assert!(output.status.success());
}

#[test]
fn test_list_providers_prints_enabled_names_sorted() {
    let (_tmp, config_path) = setup_test_env();

    let output = run_lifestream(&config_path, &["update", "--list-providers"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec!["Available data providers:", "  lastfm", "  pownce", "  twitter"]
    );
}

#[test]
fn test_disabled_provider_is_reported_with_missing_settings() {
    let (_tmp, config_path) = setup_test_env();

    let output = run_lifestream(&config_path, &["update", "-l"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("flickr"), "stderr: {}", stderr);
    assert!(stderr.contains("providers.flickr.user_id"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_provider_fails_before_updating() {
    let (tmp, config_path) = setup_test_env();

    let output = run_lifestream(&config_path, &["update", "-p", "twitter", "-p", "myspace"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid provider: 'myspace'"), "stderr: {}", stderr);
    assert!(stderr.contains("lastfm, pownce, twitter"), "stderr: {}", stderr);
    assert!(!tmp.path().join("data/lifestream.sqlite").exists());
}

#[test]
fn test_timeline_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();

    assert!(run_lifestream(&config_path, &["init"]).status.success());
    let output = run_lifestream(&config_path, &["timeline", "--kind", "track"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_timeline_rejects_unknown_kind() {
    let (_tmp, config_path) = setup_test_env();

    assert!(run_lifestream(&config_path, &["init"]).status.success());
    let output = run_lifestream(&config_path, &["timeline", "--kind", "tweet"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown record kind"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let output = run_lifestream(&tmp.path().join("nope.toml"), &["update", "-l"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}
