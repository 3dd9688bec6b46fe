use assert_cmd::Command;
use predicates::str::contains;

fn cmd(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("memory-cli").unwrap();
    cmd.arg("--memory-dir").arg(dir.path()).arg("--format").arg("json");
    cmd
}

#[test]
fn save_then_recall_round_trips() {
    let dir = tempfile::tempdir().unwrap();

    cmd(&dir)
        .args(["memory", "save", "--session-id", "s1", "--type", "lesson", "--content", "always write tests first"])
        .assert()
        .success()
        .stdout(contains("\"status\": \"created\""));

    cmd(&dir)
        .args(["memory", "recall", "always write tests"])
        .assert()
        .success()
        .stdout(contains("always write tests first"));
}

#[test]
fn stats_reports_zero_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();

    cmd(&dir).args(["memory", "stats"]).assert().success().stdout(contains("\"active\": 0"));
}

#[test]
fn error_log_without_fix_stays_open() {
    let dir = tempfile::tempdir().unwrap();

    cmd(&dir)
        .args([
            "self",
            "error-log",
            "--session-id",
            "s1",
            "--category",
            "timeout",
            "--description",
            "request timed out",
        ])
        .assert()
        .success()
        .stdout(contains("\"pattern_detected\": false"));
}

#[test]
fn rule_promotion_rejects_ineligible_insight() {
    let dir = tempfile::tempdir().unwrap();

    let save = cmd(&dir)
        .args([
            "self",
            "insight",
            "add",
            "--session-id",
            "s1",
            "--content",
            "always check the lockfile",
            "--category",
            "config_error",
        ])
        .output()
        .unwrap();
    let stdout = String::from_utf8(save.stdout).unwrap();
    let id = stdout
        .lines()
        .find(|l| l.contains("\"id\""))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().trim_end_matches(',').parse::<i64>().ok())
        .expect("insight id in output");

    cmd(&dir)
        .args(["self", "insight", "promote", "--id", &id.to_string()])
        .assert()
        .failure()
        .stderr(contains("not eligible for promotion"));
}
