// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! End-to-end tests that drive the compiled binary with real shell
//! interestingness tests in scratch directories.

#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

const BIN: &str = env!("CARGO_BIN_EXE_whittle");

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("interesting.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn reduce(dir: &Path, script: &Path, case: &Path, extra: &[&str]) -> Output {
    Command::new(BIN)
        .arg("reduce")
        .args(extra)
        .arg(script)
        .arg(case)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .unwrap()
}

fn stderr_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn reduces_while_preserving_the_property() {
    let dir = tempfile::tempdir().unwrap();
    let original = "This is a (useless (but nested)) test!\n";
    let case = dir.path().join("case.txt");
    fs::write(&case, original).unwrap();
    let script = write_script(dir.path(), "grep -q test \"$1\"");

    let out = reduce(dir.path(), &script, &case, &["--timeout", "60"]);
    assert!(out.status.success(), "stderr: {}", stderr_of(&out));

    let reduced = fs::read_to_string(&case).unwrap();
    assert!(reduced.contains("test"), "property lost: {reduced:?}");
    assert!(
        reduced.len() < original.len(),
        "no reduction happened: {reduced:?}"
    );

    // Every commit was verified in a sandbox, so the final file must still
    // pass the test.
    assert!(Command::new(&script).arg(&case).status().unwrap().success());

    // The starting content was backed up exactly once.
    assert_eq!(
        fs::read_to_string(case.with_extension("orig")).unwrap(),
        original
    );
}

#[test]
fn concurrent_successes_commit_deterministically() {
    // Both pair removals are interesting on their own, but removing both
    // kills the property, so exactly one wins and the final bytes reveal
    // which. It must be the earlier submission, every time.
    for _ in 0..3 {
        let dir = tempfile::tempdir().unwrap();
        let case = dir.path().join("case.txt");
        fs::write(&case, "keep (first) (second)\n").unwrap();
        let script = write_script(
            dir.path(),
            "grep -q first \"$1\" || grep -q second \"$1\"",
        );

        let out = reduce(
            dir.path(),
            &script,
            &case,
            &[
                "--timeout",
                "60",
                "--parallel-tests",
                "2",
                "--passes",
                "balanced:parens",
            ],
        );
        assert!(out.status.success(), "stderr: {}", stderr_of(&out));
        assert_eq!(fs::read_to_string(&case).unwrap(), "keep  (second)\n");
    }
}

#[test]
fn timed_out_attempts_do_not_stop_the_reduction() {
    let dir = tempfile::tempdir().unwrap();
    let case = dir.path().join("case.txt");
    fs::write(&case, "keep (slow) (fast)\n").unwrap();

    // Variants that lose the `slow` marker hang past the timeout; the
    // others answer immediately. The driver must keep going on the fast
    // ones.
    let script = write_script(
        dir.path(),
        "grep -q slow \"$1\" || sleep 30\ngrep -q keep \"$1\"",
    );

    let out = reduce(
        dir.path(),
        &script,
        &case,
        &[
            "--timeout",
            "2",
            "--parallel-tests",
            "2",
            "--passes",
            "balanced:parens,balanced:parens-only",
        ],
    );
    assert!(out.status.success(), "stderr: {}", stderr_of(&out));

    let reduced = fs::read_to_string(&case).unwrap();
    assert!(reduced.contains("keep"));
    assert!(reduced.contains("slow"), "a timed-out variant was committed");
    assert!(reduced.len() < "keep (slow) (fast)\n".len());
    assert!(Command::new(&script).arg(&case).status().unwrap().success());
}

#[test]
fn an_insane_test_case_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let case = dir.path().join("case.txt");
    fs::write(&case, "anything\n").unwrap();
    let script = write_script(dir.path(), "exit 1");

    let out = reduce(dir.path(), &script, &case, &[]);
    assert!(!out.status.success());
    assert!(stderr_of(&out).contains("rejects the initial test cases"));
    // nothing was committed
    assert_eq!(fs::read_to_string(&case).unwrap(), "anything\n");
}

#[test]
fn a_non_executable_test_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let case = dir.path().join("case.txt");
    fs::write(&case, "anything\n").unwrap();
    let script = dir.path().join("interesting.sh");
    fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();

    let out = reduce(dir.path(), &script, &case, &[]);
    assert!(!out.status.success());
    assert!(stderr_of(&out).contains("not executable"));
}

#[test]
fn an_empty_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let case = dir.path().join("case.txt");
    fs::write(&case, "").unwrap();
    let script = write_script(dir.path(), "exit 0");

    let out = reduce(dir.path(), &script, &case, &[]);
    assert!(!out.status.success());
    assert!(stderr_of(&out).contains("empty"));
}

#[test]
fn save_temps_keeps_the_sandboxes() {
    let dir = tempfile::tempdir().unwrap();
    let case = dir.path().join("case.txt");
    fs::write(&case, "keep (this)\n").unwrap();
    let script = write_script(dir.path(), "grep -q keep \"$1\"");

    let tmp = dir.path().join("tmp");
    fs::create_dir(&tmp).unwrap();

    let out = Command::new(BIN)
        .arg("reduce")
        .args(["--timeout", "60", "--passes", "balanced:parens", "--save-temps"])
        .arg(&script)
        .arg(&case)
        .current_dir(dir.path())
        .stdin(Stdio::null())
        .env("TMPDIR", &tmp)
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", stderr_of(&out));

    let kept: Vec<_> = fs::read_dir(&tmp)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("whittle-"))
        .collect();
    assert!(!kept.is_empty(), "no temp roots survived --save-temps");
}
