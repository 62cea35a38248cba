//! Command-line exit status tests.
//!
//! Rejected invocations exit with status 1 and leave nothing behind; a run
//! whose frame loop stopped on a decode error still exits with status 0.

mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::{CaptureBuilder, file_names, frames_dir};

fn bagframes(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bagframes"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run bagframes")
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn non_bag_input_exits_with_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let input = CaptureBuilder::new(3).write(directory.path(), "capture.mp4");
    let output = directory.path().join("video").join("out.mp4");

    let result = bagframes(&["-i", arg(&input), "-o", arg(&output)]);

    assert_eq!(result.status.code(), Some(1));
    assert!(stderr(&result).contains("only .bag files are accepted"));
    assert!(!output.parent().unwrap().exists());
}

#[test]
fn unknown_stream_exits_with_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let input = CaptureBuilder::new(3).write(directory.path(), "capture.bag");
    let output = directory.path().join("video").join("out.mp4");

    let result = bagframes(&["-i", arg(&input), "-o", arg(&output), "-s", "thermal"]);

    assert_eq!(result.status.code(), Some(1));
    assert!(stderr(&result).contains("wrong stream: thermal"));
    assert!(!output.parent().unwrap().exists());
}

#[test]
fn unknown_format_exits_with_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let input = CaptureBuilder::new(3).write(directory.path(), "capture.bag");
    let output = directory.path().join("video").join("out.avi");

    let result = bagframes(&["-i", arg(&input), "-o", arg(&output), "-f", "png"]);

    assert_eq!(result.status.code(), Some(1));
    assert!(stderr(&result).contains("wrong format: png"));
    assert!(!output.parent().unwrap().exists());
}

#[test]
fn unsupported_output_exits_with_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let input = CaptureBuilder::new(3).write(directory.path(), "capture.bag");

    for name in ["out/video.webm", "frames"] {
        let output = directory.path().join(name);
        let result = bagframes(&["-i", arg(&input), "-o", arg(&output)]);

        assert_eq!(result.status.code(), Some(1), "output {name}");
        assert!(stderr(&result).contains("Unsupported output"), "output {name}");
        assert!(!output.exists(), "output {name}");
    }
    assert!(!directory.path().join("out").exists());
}

#[test]
fn missing_recording_exits_with_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let input = directory.path().join("missing.bag");
    let output = frames_dir(directory.path());

    let result = bagframes(&["-i", arg(&input), "-o", arg(&output)]);

    assert_eq!(result.status.code(), Some(1));
    assert!(stderr(&result).contains("Failed to open capture file"));
    assert!(file_names(&output).is_empty());
}

#[test]
fn image_conversion_exits_cleanly() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let input = CaptureBuilder::new(7).write(directory.path(), "capture.bag");
    let output = frames_dir(directory.path());

    let result = bagframes(&["-i", arg(&input), "-o", arg(&output)]);

    assert_eq!(result.status.code(), Some(0), "stderr: {}", stderr(&result));
    assert_eq!(file_names(&output), vec!["0000000001.jpg", "0000000002.jpg"]);
}

#[test]
fn decode_error_still_exits_cleanly() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let input = CaptureBuilder::new(8)
        .corrupt_frame(4)
        .write(directory.path(), "capture.bag");
    let output = frames_dir(directory.path());

    let result = bagframes(&["-i", arg(&input), "-o", arg(&output), "--skip", "0"]);

    assert_eq!(result.status.code(), Some(0), "stderr: {}", stderr(&result));
    assert!(stderr(&result).contains("stopped after 4 frames"));
    assert_eq!(file_names(&output).len(), 4);
}
