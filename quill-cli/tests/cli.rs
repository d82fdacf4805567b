use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::{tempdir, TempDir};

fn quill_binary() -> &'static str {
    env!("CARGO_BIN_EXE_quill")
}

fn write_script(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write script");
    path
}

fn run(args: &[&str], script: &Path) -> Output {
    Command::new(quill_binary())
        .args(args)
        .arg(script)
        .output()
        .expect("run quill")
}

const PICK: &str = r#"
class Point {
  var x: Number

  fn double() {
    return self.x * 2
  }
}

fn pick(flag) {
  if flag { return 1 } else { return "one" }
}

fn count(n: Number) {
  var i = 0
  while i < n {
    i = i + 1
  }
  return i
}
"#;

#[test]
fn check_succeeds_on_clean_source() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "pick.ql", PICK);

    let output = run(&["check"], &script);
    assert!(output.status.success(), "expected success: {output:?}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim_end().ends_with(": ok"), "unexpected stdout: {stdout}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("note: loop in 'count' analyzed for one iteration"),
        "expected loop note: {stderr}"
    );
}

#[test]
fn check_reports_errors_with_source_context() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "lost.ql", "fn lost() {\n  return missing\n}\n");

    let output = run(&["check"], &script);
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(":2:10: error: unresolved identifier 'missing'"),
        "expected located error, got: {stderr}"
    );
    assert!(
        stderr.contains("return missing"),
        "expected source line in diagnostics: {stderr}"
    );
    assert!(
        stderr
            .lines()
            .any(|line| line.trim_start().starts_with("^^^^^^^")),
        "expected caret underline under the identifier: {stderr}"
    );
    assert!(stderr.contains("1 error(s)"), "expected error count: {stderr}");
}

#[test]
fn check_fails_on_parse_errors() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "broken.ql", "fn broken( {\n}\n");

    let output = run(&["check"], &script);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(":1:12: error: expected parameter name"),
        "expected parse error: {stderr}"
    );
    assert!(stderr.contains("Parsing failed"), "expected context: {stderr}");
}

#[test]
fn infer_lists_every_function() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "pick.ql", PICK);

    let output = run(&["infer"], &script);
    assert!(output.status.success(), "expected success: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Point.double: Number",
            "pick: Number | String",
            "count: Number",
        ]
    );
}

#[test]
fn function_filter_selects_and_rejects_names() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "pick.ql", PICK);

    let output = run(&["infer", "--function", "double"], &script);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "Point.double: Number"
    );

    let output = run(&["infer", "--function", "nope"], &script);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no function or method named 'nope'"),
        "expected unknown function error: {stderr}"
    );
}

#[test]
fn config_switches_fork_mode() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "pick.ql", PICK);
    let config = write_script(
        &tmp,
        "quill.json",
        r#"{ "analysis": { "fork_mode": "fallthrough-only", "max_branches": 64 } }"#,
    );

    let output = Command::new(quill_binary())
        .arg("--config")
        .arg(&config)
        .args(["infer", "--function", "pick"])
        .arg(&script)
        .output()
        .expect("run quill");
    assert!(output.status.success(), "expected success: {output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "pick: Number");
}

#[test]
fn unknown_config_keys_are_rejected() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "pick.ql", PICK);
    let config = write_script(&tmp, "quill.json", r#"{ "analysis": { "depth": 3 } }"#);

    let output = Command::new(quill_binary())
        .arg("--config")
        .arg(&config)
        .arg("infer")
        .arg(&script)
        .output()
        .expect("run quill");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid config"), "expected config error: {stderr}");
}

#[test]
fn infer_emits_json() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "pick.ql", PICK);

    let output = run(&["infer", "--json"], &script);
    assert!(output.status.success(), "expected success: {output:?}");
    let document: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    let functions = document["functions"].as_array().expect("functions array");
    assert_eq!(functions.len(), 3);
    assert_eq!(functions[1]["name"], "pick");
    assert_eq!(functions[1]["return_type"], "Number | String");
    assert_eq!(functions[1]["lowered"], true);
}

#[test]
fn infer_resolves_expressions_against_the_module() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "pick.ql", PICK);

    let output = run(&["infer", "--expression", "pick(true)"], &script);
    assert!(output.status.success(), "expected success: {output:?}");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "Number | String"
    );

    let output = run(&["infer", "--expression", "Point().x"], &script);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Number");
}

#[test]
fn ir_prints_listings() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(&tmp, "pick.ql", PICK);

    let output = run(&["ir", "--function", "pick"], &script);
    assert!(output.status.success(), "expected success: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("fn pick:\n"), "unexpected listing: {stdout}");
    assert!(stdout.contains("0001 GOTO_IF %1 == false -> 0005"), "{stdout}");
    assert!(stdout.contains("0004 GOTO 0007"), "{stdout}");
}

#[test]
fn ir_marks_bodies_that_cannot_be_lowered() {
    let tmp = tempdir().expect("tempdir");
    let script = write_script(
        &tmp,
        "assign.ql",
        "fn poke(p) {\n  p.x = 1\n}\n",
    );

    let output = run(&["ir"], &script);
    assert!(output.status.success(), "expected success: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<body could not be lowered>"), "{stdout}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error: assignment to this kind of target is not supported"),
        "{stderr}"
    );
}
