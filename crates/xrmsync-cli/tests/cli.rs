//! End-to-end checks of the xrmsync binary that stop before any network call.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const CONFIG: &str = r#"
[[environments]]
name = "prod"
url = "https://contoso.crm.dynamics.com"
token_env = "XRMSYNC_TEST_PROD_TOKEN"
"#;

fn xrmsync(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_xrmsync"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("XRMSYNC_TEST_PROD_TOKEN")
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

fn write_config(temp: &TempDir, content: &str) -> std::path::PathBuf {
    let path = temp.path().join("xrmsync.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn unknown_environment_is_reported() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, CONFIG);

    let output = xrmsync(&config, &["assembly", "list", "--env", "dev"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown environment 'dev'"), "{stderr}");
}

#[test]
fn missing_token_names_the_variable() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, CONFIG);

    let output = xrmsync(&config, &["assembly", "list", "--env", "prod"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("XRMSYNC_TEST_PROD_TOKEN"), "{stderr}");
}

#[test]
fn register_refuses_when_creation_is_disabled() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, CONFIG);
    let dll = temp.path().join("Acme.Plugins.dll");
    std::fs::write(&dll, b"MZ").unwrap();

    let output = xrmsync(
        &config,
        &[
            "assembly",
            "register",
            dll.to_str().unwrap(),
            "--env",
            "prod",
            "--token",
            "unused",
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not allow creating components"), "{stderr}");
}

#[test]
fn invalid_config_shows_line() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, "[[environments]]\nname = \"dev\"\nurl = \n");

    let output = xrmsync(&config, &["assembly", "list", "--env", "dev"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML parsing error"), "{stderr}");
}
