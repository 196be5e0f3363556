#![allow(missing_docs, clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const CMD_TIMEOUT: Duration = Duration::from_secs(30);

fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let articles = dir.path().join("articles");
    fs::create_dir_all(&articles).unwrap();
    fs::write(
        articles.join("hello.md"),
        "---\ntitle: Hello\ndate: 2024-05-01\ntags: [intro]\n---\n\nFirst post.\n",
    )
    .unwrap();
    fs::write(
        articles.join("ownership.md"),
        "---\ntitle: Ownership\ndate: 2024-06-01\ntags: [rust]\ncategory: guides\n---\n\nMoves and borrows.\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("folio.toml"),
        format!(
            "article_dir = {:?}\ndata_dir = {:?}\n",
            articles.display().to_string(),
            dir.path().join("data").display().to_string()
        ),
    )
    .unwrap();
    dir
}

fn folio(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("folio"));
    cmd.timeout(CMD_TIMEOUT);
    cmd.env("FOLIO_CONFIG", dir.join("folio.toml"));
    cmd.env_remove("FOLIO_ARTICLE_DIR");
    cmd.env_remove("FOLIO_DATA_DIR");
    cmd.env("NO_COLOR", "1");
    cmd
}

fn json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout should be JSON")
}

#[test]
fn list_prints_newest_first() {
    let dir = fixture();
    let output = folio(dir.path())
        .args(["list", "--format", "json", "--quiet"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let page = json(&output.stdout);
    assert_eq!(page["total"], 2);
    assert_eq!(page["articles"][0]["slug"], "ownership");
    assert_eq!(page["articles"][1]["slug"], "hello");
}

#[test]
fn show_prints_body() {
    let dir = fixture();
    folio(dir.path())
        .args(["show", "hello", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello"))
        .stdout(predicate::str::contains("First post."));
}

#[test]
fn show_missing_article_fails() {
    let dir = fixture();
    folio(dir.path())
        .args(["show", "nope", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn restore_appends_version() {
    let dir = fixture();
    let path = dir.path().join("articles/hello.md");

    // Load v1, then edit the file so the next run records v2.
    folio(dir.path()).args(["versions", "hello", "-q"]).assert().success();
    fs::write(&path, "---\ntitle: Hello 2\ndate: 2024-05-01\n---\n\nEdited.\n").unwrap();

    let output = folio(dir.path())
        .args(["restore", "hello", "1", "-f", "json", "-q"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(json(&output.stdout)["version"], 3);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("title: Hello\n"));

    let output = folio(dir.path())
        .args(["versions", "hello", "-f", "json", "-q"])
        .output()
        .unwrap();
    let versions = json(&output.stdout);
    assert_eq!(versions.as_array().map(Vec::len), Some(3));
    assert_eq!(versions[0]["reason"], "restore");
    assert_eq!(versions[0]["restored_from"], 1);
}

#[test]
fn search_requires_full_text() {
    let dir = fixture();
    folio(dir.path())
        .args(["search", "ownership", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Full-text search is disabled"));

    let output = folio(dir.path())
        .args(["--full-text", "search", "ownership", "-f", "json", "-q"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(json(&output.stdout)[0]["slug"], "ownership");
}

#[test]
fn config_reflects_overrides() {
    let dir = fixture();
    let output = folio(dir.path())
        .args(["config", "-f", "json", "--article-dir", "/tmp/elsewhere"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(json(&output.stdout)["article_dir"], "/tmp/elsewhere");
}
