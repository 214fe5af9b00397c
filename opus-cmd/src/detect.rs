use std::collections::BTreeMap;
use std::io::{stdout, Write};
use std::path::Path;

use anyhow::{Context, Result};
use opus::detect::VALIDATOR_DIR_ENV;
use opus::{CompiledValidator, Detector};
use serde::Serialize;
use tracing::info;

use crate::info::Format;

#[derive(Debug, Clone, Serialize)]
struct Report {
    directory: String,
    corrupt_count: usize,
    /// Problems by file name, sorted by name.
    corrupt: BTreeMap<String, Vec<String>>,
}

pub fn detect(
    directory: &Path,
    format: &Format,
    force_recompile: bool,
    validator_dir: Option<&Path>,
    compiler: Option<&str>,
) -> Result<()> {
    let validator = match validator_dir {
        Some(dir) => CompiledValidator::new(dir),
        None => CompiledValidator::from_env()
            .with_context(|| format!("use --validator-dir or set {VALIDATOR_DIR_ENV}"))?,
    };
    let validator = match compiler {
        Some(compiler) => validator.with_compiler(compiler),
        None => validator,
    };

    let corrupt: BTreeMap<String, Vec<String>> = Detector::new(validator)
        .detect(directory, force_recompile)
        .with_context(|| format!("checking files in {directory:?}"))?
        .into_iter()
        .collect();
    info!(corrupt = corrupt.len(), "done");

    let report = Report {
        directory: directory.to_string_lossy().to_string(),
        corrupt_count: corrupt.len(),
        corrupt,
    };
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &report).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&report).context("serializing report")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

fn render_text(report: &Report) -> Result<String> {
    let mut hb = handlebars::Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_template_string("report", TEXT_TEMPLATE)
        .context("compiling text template")?;

    hb.render("report", &report).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ directory }}
===============================================================================================
Corrupt:  {{ corrupt_count }}
{{ #each corrupt }}-----------------------------------------------------------------------------------------------
{{ @key }}
{{ #each this }}    {{ this }}
{{/each }}{{/each }}";
