use std::path::PathBuf;

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_alphamux")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "alphamux.exe"
            } else {
                "alphamux"
            });
            p
        })
}

#[test]
fn cli_batch_over_empty_tree_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("in");
    std::fs::create_dir_all(&root).unwrap();
    let out_dir = dir.path().join("out");

    let output = std::process::Command::new(exe())
        .args(["batch", "--root"])
        .arg(&root)
        .arg(&out_dir)
        .output()
        .unwrap();

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Merging 0 file(s)"));
}

#[test]
fn cli_merge_with_missing_inputs_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("merged.mov");

    let status = std::process::Command::new(exe())
        .arg("merge")
        .arg(dir.path().join("nope_sozai.mp4"))
        .arg(dir.path().join("nope_alpha.mp4"))
        .arg(&out)
        .status()
        .unwrap();

    assert!(!status.success());
    assert!(!out.exists());
}

#[test]
fn cli_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("cfg.json");
    std::fs::write(&cfg, r#"{ "quality": 0.0 }"#).unwrap();

    let status = std::process::Command::new(exe())
        .arg("--config")
        .arg(&cfg)
        .args(["batch", "--root"])
        .arg(dir.path())
        .arg(dir.path().join("out"))
        .status()
        .unwrap();

    assert!(!status.success());
}
