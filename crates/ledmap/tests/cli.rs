use assert_cmd::Command;
use predicates::prelude::*;

fn ledmap() -> Command {
    Command::cargo_bin("ledmap").unwrap()
}

#[test]
fn help_lists_the_builtin_backend() {
    ledmap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dummy"));
}

#[test]
fn unknown_backend_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    ledmap()
        .args(["serial", dir.path().to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn output_path_must_be_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    ledmap()
        .args(["dummy", missing.to_str().unwrap(), "--views", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a directory"));
}

#[test]
fn start_after_end_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    ledmap()
        .args(["dummy", dir.path().to_str().unwrap()])
        .args(["--start", "20", "--end", "10", "--views", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("start LED 20 is after end LED 10"));
}

#[test]
fn threshold_is_a_byte() {
    let dir = tempfile::tempdir().unwrap();
    ledmap()
        .args(["dummy", dir.path().to_str().unwrap(), "--threshold", "300"])
        .assert()
        .failure();
}

#[test]
fn session_starts_and_closes_with_frames() {
    let dir = tempfile::tempdir().unwrap();
    let frame = dir.path().join("frame.png");
    image::GrayImage::new(64, 48).save(&frame).unwrap();
    let maps = dir.path().join("maps");
    std::fs::create_dir(&maps).unwrap();

    ledmap()
        .args(["dummy", maps.to_str().unwrap()])
        .args(["--device", frame.to_str().unwrap(), "--views", "0"])
        .assert()
        .success();
}

#[test]
fn missing_frames_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("no-frames");
    ledmap()
        .args(["dummy", dir.path().to_str().unwrap()])
        .args(["--device", frames.to_str().unwrap(), "--views", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}
