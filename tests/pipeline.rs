//! End-to-end pipeline tests over synthetic log fixtures.
//!
//! Each fixture is one run: a small `.jsonl` event log (two sent packets,
//! one of them received) and a `.stderr` trace log with one line per known
//! pattern plus noise.

use std::fs;
use std::path::Path;

use bweplot::runs::{discover_runs, plot_all};
use tempfile::TempDir;

const STATE_LINE: &str = "bwe 12:34:56.789012 TRACE: 12:34:56.789012 delay_rate_controller.go:131: ts=2024/03/01 12:34:56.789001, seq=42, size=1200, interArrivalTime=20000, interDepartureTime=19000, interGroupDelay=-1000, estimate=0.125, threshold=12.500, usage=1, state=0";
const TARGET_LINE: &str = "bwe 12:34:57.000001 TRACE: 12:34:57.000001 send_side_bwe.go:98: rtt=300000000, delivered=51200, lossTarget=900000, delayTarget=800000, target=800000";

fn write_run_fixture(dir: &Path, stem: &str) {
    let events = [
        r#"{"time":"2024-03-01T10:00:00.000","msg":"rtp","vantage-point":"sender","payload-size":100,"unwrapped-sequence-number":1}"#,
        r#"{"time":"2024-03-01T10:00:00.040","msg":"rtp","vantage-point":"receiver","payload-size":100,"unwrapped-sequence-number":1}"#,
        r#"{"time":"2024-03-01T10:00:00.500","msg":"rtp","vantage-point":"sender","payload-size":100,"unwrapped-sequence-number":2}"#,
        r#"{"time":"2024-03-01T10:00:00.100","msg":"setting codec target bitrate","rate":300000}"#,
    ];
    fs::write(dir.join(format!("{stem}.jsonl")), events.join("\n")).unwrap();

    let trace = [
        "bwe 12:34:56.000000 INFO: sender connected",
        STATE_LINE,
        TARGET_LINE,
    ];
    fs::write(dir.join(format!("{stem}.stderr")), trace.join("\n")).unwrap();
}

#[test]
fn test_pipeline_produces_one_image_per_run() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_run_fixture(input.path(), "run-0");

    plot_all(input.path(), output.path()).unwrap();

    let image = output.path().join("run-0.png");
    assert!(image.exists(), "missing {}", image.display());
    assert!(fs::metadata(&image).unwrap().len() > 0);
    assert_eq!(fs::read_dir(output.path()).unwrap().count(), 1);
}

#[test]
fn test_rerun_overwrites_the_image() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_run_fixture(input.path(), "run-0");

    plot_all(input.path(), output.path()).unwrap();
    let first = fs::metadata(output.path().join("run-0.png")).unwrap().len();

    plot_all(input.path(), output.path()).unwrap();
    let second = fs::metadata(output.path().join("run-0.png")).unwrap().len();

    assert!(first > 0);
    assert!(second > 0);
    assert_eq!(fs::read_dir(output.path()).unwrap().count(), 1);
}

#[test]
fn test_multiple_runs_render_independently() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_run_fixture(input.path(), "run-a");
    write_run_fixture(input.path(), "run-b");

    plot_all(input.path(), output.path()).unwrap();

    assert!(output.path().join("run-a.png").exists());
    assert!(output.path().join("run-b.png").exists());
}

#[test]
fn test_unpaired_input_fails_before_dispatch() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_run_fixture(input.path(), "run-0");
    fs::write(input.path().join("orphan.jsonl"), "").unwrap();

    let err = plot_all(input.path(), output.path()).unwrap_err();
    assert!(err.to_string().contains("orphan"));
    // Discovery fails loudly before any image is produced.
    assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
}

#[test]
fn test_failed_run_does_not_block_siblings() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_run_fixture(input.path(), "good");
    fs::write(input.path().join("bad.jsonl"), "{not json\n").unwrap();
    fs::write(input.path().join("bad.stderr"), "").unwrap();

    let err = plot_all(input.path(), output.path()).unwrap_err();
    assert!(err.to_string().contains("1 of 2 runs failed"));
    assert!(output.path().join("good.png").exists());
    assert!(!output.path().join("bad.png").exists());
}

#[test]
fn test_trace_noise_contributes_nothing() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_run_fixture(input.path(), "run-0");
    // A trace log of pure noise still renders; the panels are just blank.
    fs::write(
        input.path().join("run-0.stderr"),
        "no trace lines here\nTRACE: but not a known shape\n",
    )
    .unwrap();

    plot_all(input.path(), output.path()).unwrap();
    assert!(output.path().join("run-0.png").exists());

    let runs = discover_runs(input.path()).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, "run-0");
}
