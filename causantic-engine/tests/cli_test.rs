use assert_cmd::Command;
use predicates::prelude::*;

fn causantic_in(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("causantic").unwrap();
    cmd.current_dir(dir);
    cmd.env("CAUSANTIC_DATA_DIR", dir.join("data"));
    cmd
}

#[test]
fn list_projects_on_a_fresh_store_succeeds_with_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    causantic_in(dir.path())
        .args(["--format", "json", "list-projects"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"items\": []"));
}

#[test]
fn reconstruct_without_a_selector_exits_with_user_error_code() {
    let dir = tempfile::tempdir().unwrap();
    causantic_in(dir.path()).arg("reconstruct").assert().failure().code(2);
}

#[test]
fn forget_without_project_or_session_exits_with_operational_error_code() {
    let dir = tempfile::tempdir().unwrap();
    causantic_in(dir.path()).args(["forget", "--dry-run"]).assert().failure().code(1);
}

#[test]
fn ingest_of_a_missing_file_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    causantic_in(dir.path()).args(["ingest", "/nonexistent/transcript.jsonl"]).assert().failure();
}

#[test]
fn unknown_subcommand_is_a_clap_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    causantic_in(dir.path()).arg("not-a-real-command").assert().failure().code(2);
}
