use snapbox::cmd::Command;

const STALE: &str = "\
[case testWrong]
s: str = 42  # E: wrong error

[case testExtraneous]
s: str = 'foo'  # E: wrong error
";

const CONVERGED: &str = r#"[case testWrong]
s: str = 42  # E: Incompatible types in assignment (expression has type "int", variable has type "str")

[case testExtraneous]
s: str = 'foo'
"#;

fn suite(root: &std::path::Path, text: &str) -> std::path::PathBuf {
    let path = root.join("check-cli.test");
    std::fs::write(&path, text).unwrap();
    path
}

fn trydata() -> Command {
    Command::new(env!("CARGO_BIN_EXE_trydata")).env_remove("TRYDATA")
}

#[test]
fn overwrite() {
    let root = tempfile::tempdir().unwrap();
    let path = suite(root.path(), STALE);

    trydata()
        .args(["--mode", "overwrite", "--checker"])
        .arg(env!("CARGO_BIN_EXE_checker-fixture"))
        .arg(&path)
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), CONVERGED);
}

#[test]
fn verify_fails_without_writing() {
    let root = tempfile::tempdir().unwrap();
    let path = suite(root.path(), STALE);

    trydata()
        .args(["--checker", env!("CARGO_BIN_EXE_checker-fixture")])
        .arg(&path)
        .assert()
        .code(1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), STALE);
}

#[test]
fn verify_converged() {
    let root = tempfile::tempdir().unwrap();
    let path = suite(root.path(), CONVERGED);

    trydata()
        .args(["--mode", "verify", "--checker", env!("CARGO_BIN_EXE_checker-fixture")])
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn dump() {
    let root = tempfile::tempdir().unwrap();
    let path = suite(root.path(), STALE);
    let dump = root.path().join("dump");

    trydata()
        .args(["--mode", "dump", "--dump-dir"])
        .arg(&dump)
        .args(["--checker", env!("CARGO_BIN_EXE_checker-fixture")])
        .arg(&path)
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), STALE);
    assert_eq!(
        std::fs::read_to_string(dump.join("check-cli.test")).unwrap(),
        CONVERGED
    );
}

#[test]
fn sidecar_names_checker() {
    let root = tempfile::tempdir().unwrap();
    let path = suite(root.path(), STALE);
    let checker = env!("CARGO_BIN_EXE_checker-fixture").replace('\\', "/");
    std::fs::write(
        root.path().join("check-cli.toml"),
        format!("bin.path = \"{checker}\"\nattempts = 3\n"),
    )
    .unwrap();

    trydata()
        .args(["--mode", "overwrite"])
        .arg(&path)
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), CONVERGED);
}

#[test]
fn single_attempt_is_exhausted() {
    let root = tempfile::tempdir().unwrap();
    let path = suite(root.path(), STALE);

    trydata()
        .args(["--mode", "overwrite", "--attempts", "1", "--checker"])
        .arg(env!("CARGO_BIN_EXE_checker-fixture"))
        .arg(&path)
        .assert()
        .code(1);
    // The edits of the last attempt are still written
    assert_eq!(std::fs::read_to_string(&path).unwrap(), CONVERGED);
}

#[test]
fn missing_checker() {
    let root = tempfile::tempdir().unwrap();
    let path = suite(root.path(), STALE);

    trydata()
        .args(["--checker", "does-not-exist/checker"])
        .arg(&path)
        .assert()
        .code(1);
}

#[test]
fn requires_suites() {
    trydata().assert().code(2);
}
