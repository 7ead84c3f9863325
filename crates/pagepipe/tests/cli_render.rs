#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

const HANDSHAKE: &str = r"printf 'GET / HTTP/1.1\r\nHost: paper-muncher\r\n\r\n'";

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "pagepipe-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn fake_renderer(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("paper-muncher");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script should be writable");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("script should be chmod-able");
    path
}

fn pdf_renderer(dir: &Path) -> PathBuf {
    fake_renderer(
        dir,
        &format!(
            "if [ \"$1\" = --version ]; then echo 'paper-muncher 0.9.0-fake'; exit 0; fi\n\
             {HANDSHAKE}\n\
             printf 'GET /logo.png HTTP/1.1\\r\\n\\r\\n'\n\
             printf 'PUT - HTTP/1.1\\r\\n\\r\\n'\n\
             cat > /dev/null\n\
             printf '%%PDF-1.7\\nfake\\n'"
        ),
    )
}

fn page(dir: &Path) -> PathBuf {
    let input = dir.join("page.html");
    std::fs::write(&input, "<h1>Hi</h1><img src=\"/logo.png\">").expect("input should be writable");
    let assets = dir.join("assets");
    std::fs::create_dir_all(&assets).expect("assets dir should be creatable");
    std::fs::write(assets.join("logo.png"), b"\x89PNG fake").expect("logo should be writable");
    input
}

/// Run the CLI, retrying while a freshly written renderer script is still busy.
fn run_cli(args: &[&std::ffi::OsStr], stdin: Option<&[u8]>) -> Output {
    for _ in 0..20 {
        let mut child = Command::new(env!("CARGO_BIN_EXE_pagepipe"))
            .args(args)
            .env_remove("PAGEPIPE_RENDERER")
            .env_remove("PAGEPIPE_LOG")
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("pagepipe should start");
        if let Some(data) = stdin {
            let mut pipe = child.stdin.take().expect("stdin should be piped");
            pipe.write_all(data).expect("stdin should accept the document");
        }
        let output = child.wait_with_output().expect("pagepipe should finish");
        let busy = [&output.stdout, &output.stderr]
            .iter()
            .any(|stream| String::from_utf8_lossy(stream).contains("Text file busy"));
        if !busy {
            return output;
        }
        thread::sleep(Duration::from_millis(25));
    }
    panic!("renderer script stayed busy");
}

fn os(value: &str) -> &std::ffi::OsStr {
    std::ffi::OsStr::new(value)
}

#[test]
fn print_writes_pdf_and_json_summary() {
    let dir = unique_temp_dir("print");
    let binary = pdf_renderer(&dir);
    let input = page(&dir);
    let out = dir.join("page.pdf");
    let assets = dir.join("assets");

    let output = run_cli(
        &[
            os("--format"),
            os("json"),
            os("print"),
            input.as_os_str(),
            os("-o"),
            out.as_os_str(),
            os("--assets"),
            assets.as_os_str(),
            os("--binary"),
            binary.as_os_str(),
            os("--option"),
            os("paper=A4"),
        ],
        None,
    );

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let artifact = std::fs::read(&out).expect("artifact should be written");
    assert!(artifact.starts_with(b"%PDF-"));

    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("summary should be json");
    assert_eq!(payload.get("mode").and_then(|v| v.as_str()), Some("print"));
    assert_eq!(payload.get("assets_served").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        payload.get("bytes").and_then(|v| v.as_u64()),
        Some(artifact.len() as u64)
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn stdin_to_stdout() {
    let dir = unique_temp_dir("stdio");
    let binary = pdf_renderer(&dir);

    let output = run_cli(
        &[os("print"), os("-"), os("--binary"), binary.as_os_str()],
        Some(b"<h1>Hi</h1>"),
    );

    assert!(output.status.success());
    assert_eq!(output.stdout, b"%PDF-1.7\nfake\n");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn non_pdf_output_exits_60() {
    let dir = unique_temp_dir("invalid");
    let binary = fake_renderer(
        &dir,
        &format!(
            "{HANDSHAKE}\n\
             printf 'PUT - HTTP/1.1\\r\\n\\r\\n'\n\
             cat > /dev/null\n\
             printf 'garbage'"
        ),
    );
    let input = page(&dir);

    let output = run_cli(
        &[os("print"), input.as_os_str(), os("--binary"), binary.as_os_str()],
        None,
    );
    assert_eq!(output.status.code(), Some(60));
    assert!(output.stdout.is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn stalled_renderer_exits_124() {
    let dir = unique_temp_dir("stall");
    let binary = fake_renderer(&dir, &format!("{HANDSHAKE}\nexec sleep 30"));
    let input = page(&dir);

    let output = run_cli(
        &[
            os("print"),
            input.as_os_str(),
            os("--binary"),
            binary.as_os_str(),
            os("--readline-timeout"),
            os("300ms"),
        ],
        None,
    );
    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr).contains("timed out"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_renderer_exits_3() {
    let dir = unique_temp_dir("missing");
    let input = page(&dir);

    let output = run_cli(
        &[
            os("print"),
            input.as_os_str(),
            os("--binary"),
            os("/nonexistent/paper-muncher"),
        ],
        None,
    );
    assert_eq!(output.status.code(), Some(3));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn malformed_option_exits_64() {
    let dir = unique_temp_dir("option");
    let binary = pdf_renderer(&dir);
    let input = page(&dir);

    let output = run_cli(
        &[
            os("print"),
            input.as_os_str(),
            os("--binary"),
            binary.as_os_str(),
            os("--option"),
            os("no-equals-sign"),
        ],
        None,
    );
    assert_eq!(output.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn doctor_reports_renderer_version() {
    let dir = unique_temp_dir("doctor");
    let binary = pdf_renderer(&dir);

    let output = run_cli(
        &[os("--format"), os("json"), os("doctor"), os("--binary"), binary.as_os_str()],
        None,
    );
    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("doctor should emit json");
    assert_eq!(payload.get("overall").and_then(|v| v.as_str()), Some("pass"));
    let version = payload["checks"]
        .as_array()
        .expect("checks should be an array")
        .iter()
        .find(|check| check["name"] == "renderer_version")
        .expect("version check should be present");
    assert_eq!(version["detail"], "paper-muncher 0.9.0-fake");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_crate_version() {
    let output = run_cli(&[os("version")], None);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("pagepipe {}", env!("CARGO_PKG_VERSION"))
    );
}
