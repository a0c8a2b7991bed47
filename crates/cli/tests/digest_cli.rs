use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Spawn the binary in `dir`, feed `stdin` and wait for it to exit
async fn run_cli(dir: &Path, envs: &[(&str, &str)], stdin: &str) -> std::process::Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_nutsandbolts"));
    command
        .current_dir(dir)
        .env_remove("NUTSANDBOLTS_CONFIG")
        .env("RUST_LOG", "error") // Quiet logs during tests
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }

    let mut child = command.spawn().expect("Failed to spawn cli");
    let mut child_stdin = child.stdin.take().unwrap();
    child_stdin.write_all(stdin.as_bytes()).await.unwrap();
    drop(child_stdin);

    timeout(Duration::from_secs(30), child.wait_with_output())
        .await
        .expect("cli did not exit")
        .unwrap()
}

fn write_files(dir: &TempDir, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let path = dir.path().join(format!("file-{i}.txt"));
            std::fs::write(&path, format!("content {i}")).unwrap();
            path.display().to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_prints_one_digest_per_path() {
    let dir = TempDir::new().unwrap();
    let paths = write_files(&dir, 5);
    let stdin = format!("{}\n\n", paths.join("\n"));

    let output = run_cli(
        dir.path(),
        &[
            ("NUTSANDBOLTS_PROCESS__WORKERS", "2"),
            ("NUTSANDBOLTS_CHUNKING__WINDOW_MS", "10"),
        ],
        &stdin,
    )
    .await;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut printed: Vec<&str> = stdout
        .lines()
        .map(|line| line.split_once("  ").unwrap().1)
        .collect();
    printed.sort_unstable();

    let mut expected: Vec<&str> = paths.iter().map(String::as_str).collect();
    expected.sort_unstable();
    assert_eq!(printed, expected);
    assert!(stdout.lines().all(|line| line.split_once("  ").unwrap().0.len() == 64));
}

#[tokio::test]
async fn test_json_output_from_config_file() {
    let dir = TempDir::new().unwrap();
    let paths = write_files(&dir, 3);
    std::fs::write(
        dir.path().join("nutsandbolts.toml"),
        "[process]\nworkers = 1\n\n[output]\nformat = \"json\"\n",
    )
    .unwrap();

    let output = run_cli(dir.path(), &[], &paths.join("\n")).await;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let records: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|r| r["bytes"].as_u64() == Some("content 0".len() as u64)));
}

#[tokio::test]
async fn test_missing_file_fails_run() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.bin");

    let output = run_cli(dir.path(), &[], &format!("{}\n", missing.display())).await;
    assert!(!output.status.success());

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("missing.bin"));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("nutsandbolts.toml"), "[process]\nworkers = 0\n").unwrap();

    let output = run_cli(dir.path(), &[], "").await;
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_metrics_printed_to_stderr() {
    let dir = TempDir::new().unwrap();
    let paths = write_files(&dir, 2);

    let output = run_cli(
        dir.path(),
        &[("NUTSANDBOLTS_OUTPUT__PRINT_METRICS", "true")],
        &paths.join("\n"),
    )
    .await;
    assert!(output.status.success());

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("nutsandbolts_files_digested_total 2"));
    assert_eq!(String::from_utf8(output.stdout).unwrap().lines().count(), 2);
}
