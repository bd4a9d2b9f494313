use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const PROGRAM: &str = "val edges = [(1, 2), (2, 3)];
fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = edge (x, y) orelse (exists z where edge (x, z) andalso path (z, y));
";

const RUNTIME_PROGRAM: &str = "val edges : (int * int) list;
fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = edge (x, y) orelse (exists z where edge (x, z) andalso path (z, y));
";

fn fixq_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fixq"))
}

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).expect("write fixture");
    path
}

fn fixq(args: &[&str]) -> Output {
    Command::new(fixq_bin())
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("run fixq")
}

fn stdout_json(out: &Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "fixq failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("json output")
}

#[test]
fn invert_prints_fixpoint_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write(dir.path(), "graph.fq", PROGRAM);
    let out = fixq(&["invert", file.to_str().unwrap(), "from p where path p", "--json"]);
    let v = stdout_json(&out);
    assert_eq!(v["invertible"], true);
    assert_eq!(
        v["query"],
        "from p in List.iterate edges (fn (old, new) => from (x, z) in edges, (z_1, y) in new where z = z_1 yield (x, y))"
    );
    assert!(v["plan_digest"].as_str().unwrap().starts_with("fnv1a64:"));
}

#[test]
fn invert_reports_unbounded_base() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write(dir.path(), "graph.fq", RUNTIME_PROGRAM);
    let out = fixq(&["invert", file.to_str().unwrap(), "from p where path p", "--json"]);
    let v = stdout_json(&out);
    assert_eq!(v["invertible"], false);
    assert!(v["reason"].as_str().unwrap().contains("edges"));
}

#[test]
fn run_evaluates_the_inverted_plan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write(dir.path(), "graph.fq", PROGRAM);
    let out = fixq(&["run", file.to_str().unwrap(), "from p where path p", "--json"]);
    let v = stdout_json(&out);
    assert_eq!(v["inverted"], true);
    assert_eq!(v["result"], "[(1, 2), (2, 3), (1, 3)]");
}

#[test]
fn run_without_inversion_needs_an_extent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write(dir.path(), "graph.fq", PROGRAM);
    let path = file.to_str().unwrap();

    let out = fixq(&["run", path, "from (x, y) where path (x, y)", "--no-invert"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("no extent"));

    let out = fixq(&[
        "run",
        path,
        "from (x, y) where path (x, y)",
        "--no-invert",
        "--extent",
        "0..4",
        "--json",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["inverted"], false);
    assert_eq!(v["result"], "[(1, 2), (1, 3), (2, 3)]");
}

#[test]
fn runtime_binding_falls_back_to_enumeration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write(dir.path(), "graph.fq", RUNTIME_PROGRAM);
    let out = fixq(&[
        "run",
        file.to_str().unwrap(),
        "from (x, y) where path (x, y)",
        "--bind",
        "edges=[(1, 2), (2, 3)]",
        "--extent",
        "0..4",
        "--json",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["inverted"], false);
    assert_eq!(v["result"], "[(1, 2), (1, 3), (2, 3)]");
}

#[test]
fn config_file_can_disable_inversion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write(dir.path(), "graph.fq", PROGRAM);
    let config = write(dir.path(), "invert.json", r#"{ "enabled": false }"#);
    let out = fixq(&[
        "invert",
        file.to_str().unwrap(),
        "from p where path p",
        "--config",
        config.to_str().unwrap(),
        "--json",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["invertible"], false);
    assert!(v["reason"].as_str().unwrap().contains("disabled"));
}

#[test]
fn parse_errors_fail_with_context() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write(dir.path(), "broken.fq", "fun path (x, y) = ;");
    let out = fixq(&["invert", file.to_str().unwrap(), "from p where path p"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("parsing"));
}
