use std::path::{Path, PathBuf};

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pagepipe_driver::{locate, probe, RenderError};
use serde::Serialize;

use crate::cmd::{parse_duration, DoctorArgs};
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.probe_timeout)?;

    let mut checks = vec![platform_check(), temp_dir_writable_check()];
    let located = locate(args.binary.as_deref());
    checks.push(located_check(&located));
    checks.push(match &located {
        Ok(binary) => version_check(binary, probe(binary, timeout)),
        Err(_) => CheckResult::new(
            "renderer_version",
            CheckStatus::Skip,
            "renderer not found",
        ),
    });
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(FAILURE)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHECK", "STATUS", "DETAIL"]);
            for c in &output.checks {
                table.add_row(vec![
                    c.name.clone(),
                    status_text(c.status).to_string(),
                    c.detail.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("pagepipe doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn platform_check() -> CheckResult {
    if cfg!(unix) {
        CheckResult::new("platform", CheckStatus::Pass, "poll(2) pipes available")
    } else {
        CheckResult::new(
            "platform",
            CheckStatus::Fail,
            "renderer pipes are only supported on Unix",
        )
    }
}

fn temp_dir_writable_check() -> CheckResult {
    let path = std::env::temp_dir().join(format!(
        "pagepipe-doctor-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    ));
    let result = std::fs::write(&path, b"pagepipe");
    let _ = std::fs::remove_file(&path);
    match result {
        Ok(()) => CheckResult::new(
            "temp_dir_writable",
            CheckStatus::Pass,
            format!("{} is writable", std::env::temp_dir().display()),
        ),
        Err(err) => CheckResult::new(
            "temp_dir_writable",
            CheckStatus::Fail,
            format!("{}: {err}", std::env::temp_dir().display()),
        ),
    }
}

fn located_check(located: &Result<PathBuf, RenderError>) -> CheckResult {
    match located {
        Ok(binary) => CheckResult::new(
            "renderer_located",
            CheckStatus::Pass,
            binary.display().to_string(),
        ),
        Err(err) => CheckResult::new("renderer_located", CheckStatus::Fail, err.to_string()),
    }
}

fn version_check(binary: &Path, probed: Result<String, RenderError>) -> CheckResult {
    match probed {
        Ok(version) if version.is_empty() => CheckResult::new(
            "renderer_version",
            CheckStatus::Pass,
            format!("{} ran but printed no version", binary.display()),
        ),
        Ok(version) => CheckResult::new("renderer_version", CheckStatus::Pass, version),
        Err(err) => CheckResult::new("renderer_version", CheckStatus::Fail, err.to_string()),
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = vec!["cli"];
    if cfg!(feature = "async") {
        features.push("async");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn missing_renderer_fails_the_locate_check() {
        let located = Err(RenderError::Launch {
            binary: PathBuf::from("paper-muncher"),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        let check = located_check(&located);
        assert!(matches!(check.status, CheckStatus::Fail));
        assert!(check.detail.contains("paper-muncher"));
    }

    #[test]
    fn probed_version_is_reported() {
        let check = version_check(Path::new("/opt/pm"), Ok("paper-muncher 0.3.1".to_string()));
        assert!(matches!(check.status, CheckStatus::Pass));
        assert_eq!(check.detail, "paper-muncher 0.3.1");
    }
}
