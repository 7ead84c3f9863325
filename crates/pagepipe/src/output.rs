use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What a finished render produced, for reporting.
#[derive(Debug, Serialize)]
pub struct RenderSummary {
    pub mode: String,
    pub output: String,
    pub bytes: usize,
    pub assets_served: usize,
    pub exit_status: Option<i32>,
    pub diagnostics: String,
}

pub fn print_summary(summary: &RenderSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["MODE", "OUTPUT", "BYTES", "ASSETS", "EXIT"])
                .add_row(vec![
                    summary.mode.clone(),
                    summary.output.clone(),
                    summary.bytes.to_string(),
                    summary.assets_served.to_string(),
                    exit_text(summary.exit_status),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "mode={} output={} bytes={} assets={} exit={}",
                summary.mode,
                summary.output,
                summary.bytes,
                summary.assets_served,
                exit_text(summary.exit_status)
            );
        }
        OutputFormat::Raw => println!("{}", summary.output),
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn exit_text(code: Option<i32>) -> String {
    code.map_or_else(|| "-".to_string(), |code| code.to_string())
}
