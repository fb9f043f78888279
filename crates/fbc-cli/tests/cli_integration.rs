//! End-to-end tests driving the built `fbc` binary directly, since this
//! crate is bin-only and has no library surface to call into.

use std::process::Command;

fn fbc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fbc"))
}

#[test]
fn demo_simple_assign_print_emits_il() {
    let output = fbc().args(["--demo", "simple-assign-print", "--emit-qbe"]).output().expect("spawn fbc");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("func"), "expected IL text, got: {text}");
}

#[test]
fn demo_madd_fusion_collects_single_madd() {
    let output = fbc().args(["--demo", "madd-fusion", "--run"]).output().expect("spawn fbc");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.to_lowercase().contains("madd"), "expected a fused MADD, got: {text}");
}

#[test]
fn disabling_madd_fusion_keeps_mul_and_add_separate() {
    let output = fbc().args(["--demo", "madd-fusion", "--run", "--disable-madd-fusion"]).output().expect("spawn fbc");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = String::from_utf8_lossy(&output.stdout).to_lowercase();
    assert!(!text.contains("madd"), "fusion should have been disabled, got: {text}");
    assert!(text.contains("mul_rrr"), "expected a separate mul, got: {text}");
}

#[test]
fn unknown_demo_name_fails_with_nonzero_exit() {
    let output = fbc().args(["--demo", "does-not-exist"]).output().expect("spawn fbc");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown demo"));
}

#[test]
fn missing_input_fails_with_nonzero_exit() {
    let output = fbc().output().expect("spawn fbc");
    assert!(!output.status.success());
}

#[test]
fn unsupported_target_is_rejected() {
    let output = fbc().args(["--demo", "simple-assign-print", "--target", "x86_64"]).output().expect("spawn fbc");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("aarch64"));
}

#[test]
fn compile_only_and_run_conflict() {
    let output = fbc().args(["--demo", "madd-fusion", "--compile-only", "--run"]).output().expect("spawn fbc");
    assert!(!output.status.success());
}
