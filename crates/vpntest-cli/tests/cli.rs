//! Binary-level checks that must hold before any side effect.

use std::process::Command;

fn vpn_test() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vpn-test"))
}

#[test]
fn test_help_exits_zero_without_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let output = vpn_test()
        .arg("--help")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--skip-censor-dpi"));
    assert!(stdout.contains("--fetch-failure"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_invalid_lang_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = vpn_test()
        .args(["--lang", "xx", "--outdir"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("xx"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_unknown_flag_fails() {
    let output = vpn_test().arg("--no-such-flag").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}
