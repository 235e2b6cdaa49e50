use anyhow::{Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn tankcheck_command(args: &[&str]) -> Result<Output> {
    let mut me = std::env::current_exe()?;
    me.pop(); // chop off the file name
    me.pop(); // chop off `deps`
    me.push("tankcheck");
    Ok(Command::new(&me).env("TANKCHECK_LOG", "warn").args(args).output()?)
}

fn run_tankcheck(args: &[&str]) -> Result<String> {
    let output = tankcheck_command(args)?;
    if !output.status.success() {
        bail!(
            "Failed to execute tankcheck with: {:?}\n{}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8(output.stdout).unwrap())
}

/// Run tankcheck expecting failure; returns its stderr.
fn fail_tankcheck(args: &[&str]) -> Result<String> {
    let output = tankcheck_command(args)?;
    if output.status.success() {
        bail!("tankcheck unexpectedly succeeded with: {args:?}");
    }
    Ok(String::from_utf8(output.stderr).unwrap())
}

fn double_model() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("crates/tankcheck/tests/fixtures/double")
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn write_f32s(dir: &Path, name: &str, values: &[f32]) -> Result<()> {
    fs::create_dir_all(dir)?;
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(dir.join(name), bytes)?;
    Ok(())
}

/// A model whose single output has a dynamic batch dimension.
fn dynamic_logits_model(dir: &Path) -> Result<PathBuf> {
    let model = dir.join("logits");
    fs::create_dir_all(&model)?;
    let manifest = serde_json::json!({
        "name": "logits",
        "inputs": [],
        "outputs": [
            { "name": "logits", "index": 0, "shape": [-1, 4], "dtype": "float32" }
        ],
    });
    fs::write(model.join("model.json"), serde_json::to_string_pretty(&manifest)?)?;
    Ok(model)
}

#[test]
fn help() -> Result<()> {
    let stdout = run_tankcheck(&["--help"])?;
    assert!(stdout.contains("check"));
    assert!(stdout.contains("compare"));
    Ok(())
}

#[test]
fn completion() -> Result<()> {
    let stdout = run_tankcheck(&["completion", "bash"])?;
    assert!(stdout.contains("tankcheck"));
    Ok(())
}

// Comparing the reference outputs with themselves reports a zero error.
#[test]
fn compare_identical() -> Result<()> {
    let model = double_model();
    let outputs = model.join("outputs");
    let stdout = run_tankcheck(&[
        "compare",
        "--model",
        path(&model),
        path(&outputs),
        path(&outputs),
    ])?;
    assert_eq!(stdout.trim(), "output 0 (doubled): max error 0");
    Ok(())
}

#[test]
fn compare_reports_max_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = dynamic_logits_model(dir.path())?;
    write_f32s(&dir.path().join("candidate"), "0.bin", &[1.0, 2.0, 3.0, 4.5])?;
    write_f32s(&dir.path().join("reference"), "0.bin", &[1.0, 2.0, 3.0, 4.0])?;
    let stdout = run_tankcheck(&[
        "compare",
        "--model",
        path(&model),
        path(&dir.path().join("candidate")),
        path(&dir.path().join("reference")),
    ])?;
    assert_eq!(stdout.trim(), "output 0 (logits): max error 0.5");
    Ok(())
}

#[test]
fn compare_shape_mismatch_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = dynamic_logits_model(dir.path())?;
    write_f32s(&dir.path().join("candidate"), "0.bin", &[0.0; 8])?;
    write_f32s(&dir.path().join("reference"), "0.bin", &[0.0; 4])?;
    let stderr = fail_tankcheck(&[
        "compare",
        "--model",
        path(&model),
        path(&dir.path().join("candidate")),
        path(&dir.path().join("reference")),
    ])?;
    assert!(stderr.contains("shape doesnot match"), "{stderr}");
    Ok(())
}

#[test]
fn compare_length_mismatch_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = dynamic_logits_model(dir.path())?;
    fs::create_dir_all(dir.path().join("candidate"))?;
    write_f32s(&dir.path().join("reference"), "0.bin", &[0.0; 4])?;
    let stderr = fail_tankcheck(&[
        "compare",
        "--model",
        path(&model),
        path(&dir.path().join("candidate")),
        path(&dir.path().join("reference")),
    ])?;
    assert!(stderr.contains("Number of results do not match"), "{stderr}");
    Ok(())
}

// Extra candidate files are a count mismatch even when the model has fewer
// outputs than files.
#[test]
fn compare_extra_results_report_length_mismatch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = dynamic_logits_model(dir.path())?;
    write_f32s(&dir.path().join("candidate"), "0.bin", &[0.0; 4])?;
    write_f32s(&dir.path().join("candidate"), "1.bin", &[0.0; 4])?;
    write_f32s(&dir.path().join("reference"), "0.bin", &[0.0; 4])?;
    let stderr = fail_tankcheck(&[
        "compare",
        "--model",
        path(&model),
        path(&dir.path().join("candidate")),
        path(&dir.path().join("reference")),
    ])?;
    assert!(
        stderr.contains("Number of results do not match: 2 != 1"),
        "{stderr}"
    );
    Ok(())
}

#[test]
fn inputs_are_written_normalized() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let workdir = dir.path().join("work");
    let output = dir.path().join("generated");
    run_tankcheck(&[
        "inputs",
        "--workdir",
        path(&workdir),
        "-o",
        path(&output),
        path(&double_model()),
    ])?;

    let bytes = fs::read(output.join("0.bin"))?;
    // One [1, 2, 2, 3] float32 image.
    assert_eq!(bytes.len(), 12 * 4);
    for chunk in bytes.chunks_exact(4) {
        let v = f32::from_le_bytes(chunk.try_into().unwrap());
        assert!((-1.0..=1.0).contains(&v), "{v} is not normalized");
    }
    Ok(())
}

#[test]
fn check_missing_model_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stderr = fail_tankcheck(&["check", path(&dir.path().join("nope"))])?;
    assert!(stderr.contains("failed to open model"), "{stderr}");
    Ok(())
}
