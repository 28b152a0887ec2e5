//! Binary smoke tests: append to a session file, then select from it.

use std::path::Path;
use std::process::Command;

use serde_json::Value;

fn ctxbudget(config: &Path, args: &[&str]) -> Value {
    let output = Command::new(env!("CARGO_BIN_EXE_ctxbudget"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("run ctxbudget");
    assert!(
        output.status.success(),
        "ctxbudget {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        "[budget]\nmax_tokens = 25\npin_first_n = 1\n\n[policy]\nsliding_window_max_items = 1\n",
    )
    .expect("write config");
    path
}

#[test]
fn append_then_select_truncates_to_budget() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());
    let session = dir.path().join("session.json");
    let session_arg = session.to_str().expect("utf8 path");

    for (role, text) in [
        ("system", "a".repeat(40)),
        ("user", "b".repeat(40)),
        ("assistant", "c".repeat(40)),
        ("user", "d".repeat(40)),
    ] {
        ctxbudget(
            &config,
            &["append", "--session", session_arg, "--role", role, "--text", text.as_str()],
        );
    }

    let selected = ctxbudget(
        &config,
        &["select", "--session", session_arg, "--policy", "truncation"],
    );
    assert_eq!(selected["policy"], "truncation");
    assert_eq!(selected["selection"]["used_tokens"], 20);
    let items = selected["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["role"], "system");
    assert_eq!(items[1]["role"], "user");
}

#[test]
fn select_honors_budget_overrides_and_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());
    let session = dir.path().join("session.json");
    let session_arg = session.to_str().expect("utf8 path");

    for text in ["one", "two", "three"] {
        ctxbudget(
            &config,
            &["append", "--session", session_arg, "--role", "user", "--text", text],
        );
    }

    let window = ctxbudget(
        &config,
        &[
            "select",
            "--session",
            session_arg,
            "--policy",
            "sliding-window",
            "--summary-only",
        ],
    );
    assert!(window.get("items").is_none());
    assert_eq!(window["selection"]["segments"].as_array().map(Vec::len), Some(2));

    let usage = ctxbudget(
        &config,
        &["usage", "--session", session_arg, "--max-tokens", "0"],
    );
    assert_eq!(usage["status"], "pinned_too_large");
}
