use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use q7_digits::quantization::FixedPoint;

const BIN: &str = env!("CARGO_BIN_EXE_q7-digits");

fn write_idx(dir: &Path, labels: &[u8]) {
    let mut images = Vec::new();
    for word in [0x803u32, labels.len() as u32, 28, 28] {
        images.extend_from_slice(&word.to_be_bytes());
    }
    images.extend((0..labels.len() * 28 * 28).map(|i| (i % 256) as u8));
    fs::write(dir.join("t10k-images-idx3-ubyte"), images).unwrap();

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x801u32.to_be_bytes());
    bytes.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    bytes.extend_from_slice(labels);
    fs::write(dir.join("t10k-labels-idx1-ubyte"), bytes).unwrap();
}

fn run(args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .env_remove("NNOM_TEST_ON_CI")
        .env("NNOM_ON_CI", "1")
        .output()
        .unwrap()
}

/// A runtime that always answers class 3 with a decoded score of ~0.9
#[cfg(unix)]
fn stub_runtime(dir: &Path, output: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let mut scores = vec![0.01f32; 10];
    scores[3] = 0.9;
    let reply = dir.join("reply.raw");
    fs::write(&reply, FixedPoint::new(7).encode_bytes(&scores)).unwrap();

    let script = dir.join("mnist");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\ncat '{}' > '{}'\n",
            reply.display(),
            output.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(unix)]
fn validate(dir: &Path, labels: &[u8]) -> Output {
    write_idx(dir, labels);
    fs::write(dir.join(".shift_list"), "{'input_1': 0, 'Softmax1': 7}").unwrap();

    let input = dir.join("tmp/input.raw");
    let output = dir.join("tmp/Softmax1.raw");
    let script = stub_runtime(dir, &output);

    run(&[
        "validate",
        "--data-dir",
        dir.to_str().unwrap(),
        "--shift-list",
        dir.join(".shift_list").to_str().unwrap(),
        "--program",
        script.to_str().unwrap(),
        "--input-file",
        input.to_str().unwrap(),
        "--output-file",
        output.to_str().unwrap(),
        "--progress-interval",
        "5",
    ])
}

#[cfg(unix)]
#[test]
fn validate_passes_and_fails_on_accuracy() {
    let dir = tempfile::tempdir().unwrap();
    let out = validate(dir.path(), &[3; 10]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout.contains("100.0%(6) out of 6 is correct predicted"), "{stdout}");
    assert!(stdout.contains("100.0%(10) out of 10 is correct predicted"), "{stdout}");
    // the pixel data was quantized before being handed to the runtime
    let sent = fs::read(dir.path().join("tmp/input.raw")).unwrap();
    assert_eq!(sent.len(), 28 * 28);
    assert!(sent.iter().all(|&b| b <= 31));

    let dir = tempfile::tempdir().unwrap();
    let out = validate(dir.path(), &[3, 3, 3, 3, 3, 3, 3, 3, 1, 2]);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(!out.status.success());
    assert!(stderr.contains("accuracy is 80.0% < 80%"), "{stderr}");
}

#[test]
fn missing_shift_table_aborts() {
    let dir = tempfile::tempdir().unwrap();
    write_idx(dir.path(), &[1]);
    let out = run(&[
        "validate",
        "--data-dir",
        dir.path().to_str().unwrap(),
        "--shift-list",
        dir.path().join(".shift_list").to_str().unwrap(),
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains(".shift_list"));
}

#[test]
fn prepare_writes_test_bin_once() {
    let dir = tempfile::tempdir().unwrap();
    let labels: Vec<u8> = (0..130).map(|i| (i % 10) as u8).collect();
    write_idx(dir.path(), &labels);
    let bin = dir.path().join("mnist_test_data.bin");
    let args = [
        "prepare",
        "--data-dir",
        dir.path().to_str().unwrap(),
        "--test-bin",
        bin.to_str().unwrap(),
    ];

    let out = run(&args);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("130 test samples"), "{stdout}");
    assert!(stdout.contains("data range 0 31"), "{stdout}");
    assert!(stdout.contains("128 samples written"), "{stdout}");
    assert_eq!(fs::metadata(&bin).unwrap().len(), 128 * (1 + 28 * 28));

    fs::write(&bin, b"keep").unwrap();
    assert!(run(&args).status.success());
    assert_eq!(fs::read(&bin).unwrap(), b"keep");
}

/// Runs the binary with no subcommand inside `dir`, where the default relative paths resolve
fn run_default(dir: &Path, test_on_ci: Option<&str>, on_ci: Option<&str>) -> Output {
    let mut cmd = Command::new(BIN);
    cmd.current_dir(dir).env_remove("NO_COLOR");
    match test_on_ci {
        Some(value) => cmd.env("NNOM_TEST_ON_CI", value),
        None => cmd.env_remove("NNOM_TEST_ON_CI"),
    };
    match on_ci {
        Some(value) => cmd.env("NNOM_ON_CI", value),
        None => cmd.env_remove("NNOM_ON_CI"),
    };
    cmd.output().unwrap()
}

fn default_data_dir(dir: &Path) {
    let data = dir.join("data");
    fs::create_dir(&data).unwrap();
    let labels: Vec<u8> = (0..128).map(|i| (i % 10) as u8).collect();
    write_idx(&data, &labels);
}

#[test]
fn no_subcommand_prepares_by_default() {
    let dir = tempfile::tempdir().unwrap();
    default_data_dir(dir.path());

    let out = run_default(dir.path(), None, Some("1"));
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("128 samples written"), "{stdout}");
    assert_eq!(
        fs::metadata(dir.path().join("mnist_test_data.bin")).unwrap().len(),
        128 * (1 + 28 * 28)
    );

    // any value other than YES keeps the prepare path
    fs::remove_file(dir.path().join("mnist_test_data.bin")).unwrap();
    let out = run_default(dir.path(), Some("NO"), Some("1"));
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(dir.path().join("mnist_test_data.bin").exists());
}

#[test]
fn test_on_ci_selects_validation() {
    let dir = tempfile::tempdir().unwrap();
    // prepare would succeed here; validation needs the shift table
    default_data_dir(dir.path());

    let out = run_default(dir.path(), Some("YES"), Some("1"));
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains(".shift_list"), "{stderr}");
    assert!(!dir.path().join("mnist_test_data.bin").exists());
}

#[test]
fn on_ci_disables_coloured_logs() {
    let dir = tempfile::tempdir().unwrap();
    default_data_dir(dir.path());

    let out = run_default(dir.path(), None, Some("1"));
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("INFO"), "{stderr}");
    assert!(!stderr.contains("\x1b["), "{stderr}");

    let dir = tempfile::tempdir().unwrap();
    default_data_dir(dir.path());
    let out = run_default(dir.path(), None, None);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("\x1b["));
}
