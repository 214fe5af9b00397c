use std::collections::BTreeMap;
use std::io::{stdout, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use handlebars::handlebars_helper;
use opus::{InterferogramMode, OpusFile, ParameterValue, ReadOptions, TimestampMode};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Entry {
    category: String,
    block_type: u32,
    length_words: u32,
    offset: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
struct Samples {
    min: f64,
    max: f64,
    mean: f64,
}

#[derive(Debug, Clone, Serialize)]
struct Channel {
    index: usize,
    measurement_time: String,
    npt: Option<i32>,
    scale: Option<f64>,
    samples: Option<Samples>,
    /// Data status parameters in declaration order.
    parameters: Vec<(String, Option<ParameterValue>)>,
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    version: f64,
    timestamp_mode: TimestampMode,
    interferogram_mode: InterferogramMode,
    directory: Vec<Entry>,
    channel_count: usize,
    channels: Vec<Channel>,
    /// Parameters shared by all channels, by group.
    shared: BTreeMap<&'static str, Vec<(String, Option<ParameterValue>)>>,
}

fn parameters(block: &opus::ParameterBlock) -> Vec<(String, Option<ParameterValue>)> {
    block
        .iter()
        .map(|(k, v)| (k.to_string(), v.cloned()))
        .collect()
}

fn summarize(opus: &OpusFile, fpath: &Path, opts: &ReadOptions) -> Info {
    let directory = opus
        .directory
        .iter()
        .map(|e| Entry {
            category: e.category.to_string(),
            block_type: e.block_type,
            length_words: e.length_words,
            offset: e.offset,
        })
        .collect();

    let channels = opus
        .channel_parameters
        .iter()
        .zip(&opus.measurement_times)
        .enumerate()
        .map(|(index, (params, time))| {
            let samples = opus.interferogram.as_ref().map(|ifg| {
                let row = ifg.row(index);
                Samples {
                    min: row.iter().copied().fold(f64::INFINITY, f64::min),
                    max: row.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    mean: row.mean().unwrap_or_default(),
                }
            });
            Channel {
                index,
                measurement_time: time.to_rfc3339_opts(SecondsFormat::Micros, true),
                npt: params.spectrum.get_i32("spectrum", "NPT").ok(),
                scale: params.spectrum.get_f64("spectrum", "CSF").ok(),
                samples,
                parameters: parameters(&params.spectrum),
            }
        })
        .collect();

    let mut shared = BTreeMap::default();
    if let Some(first) = opus.channel_parameters.first() {
        shared.insert("instrument", parameters(&first.instrument));
        shared.insert("acquisition", parameters(&first.acquisition));
        shared.insert("optics", parameters(&first.optics));
        shared.insert("sample", parameters(&first.sample));
        shared.insert("fourier_transform", parameters(&first.fourier_transform));
    }

    Info {
        filename: fpath.to_string_lossy().to_string(),
        version: opus.header.version,
        timestamp_mode: opts.timestamp_mode,
        interferogram_mode: opts.interferogram_mode,
        directory,
        channel_count: opus.channel_count(),
        channels,
        shared,
    }
}

pub fn info(
    fpath: &Path,
    format: &Format,
    timestamp_mode: TimestampMode,
    interferogram_mode: InterferogramMode,
    read_all_channels: bool,
) -> Result<()> {
    let opts = ReadOptions::builder()
        .timestamp_mode(timestamp_mode)
        .interferogram_mode(interferogram_mode)
        .read_all_channels(read_all_channels)
        .build();
    debug!(?opts, "reading");
    let opus = OpusFile::read(fpath, &opts).with_context(|| format!("reading {fpath:?}"))?;
    let info = summarize(&opus, fpath, &opts);

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("serializing info")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

fn render_text(info: &Info) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:>num$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("compiling text template")?;

    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
===============================================================================================
Version:        {{ version }}
Timestamps:     {{ timestamp_mode }}
Interferogram:  {{ interferogram_mode }}
Channels:       {{ channel_count }}
-----------------------------------------------------------------------------------------------
Category          Type     Words      Offset
-----------------------------------------------------------------------------------------------
{{ #each directory }}{{ lpad 12 category }}  {{ lpad 8 block_type }}  {{ lpad 8 length_words }}  {{ lpad 10 offset }}
{{/each }}-----------------------------------------------------------------------------------------------
Channel  Time                                NPT         Scale           Min           Max
-----------------------------------------------------------------------------------------------
{{ #each channels }}{{ lpad 7 index }}  {{ lpad 27 measurement_time }}  {{ lpad 9 npt }}  {{ lpad 12 scale }}  {{ lpad 12 samples.min }}  {{ lpad 12 samples.max }}
{{/each }}";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output() {
        let info = Info {
            filename: "ma20220409.ifg.0001".to_string(),
            version: 920_622.0,
            timestamp_mode: TimestampMode::Start,
            interferogram_mode: InterferogramMode::Skip,
            directory: vec![Entry {
                category: "DBTDSTAT".to_string(),
                block_type: 2071,
                length_words: 48,
                offset: 420,
            }],
            channel_count: 1,
            channels: vec![Channel {
                index: 0,
                measurement_time: "2022-04-09T00:00:06.500000Z".to_string(),
                npt: Some(228_512),
                scale: Some(1.0),
                samples: None,
                parameters: vec![("NPT".to_string(), Some(ParameterValue::Int(228_512)))],
            }],
            shared: BTreeMap::default(),
        };

        let text = render_text(&info).unwrap();

        assert!(text.starts_with("ma20220409.ifg.0001\n"), "got {text}");
        assert!(text.contains("Timestamps:     start"), "got {text}");
        assert!(text.contains("Channels:       1"), "got {text}");
        assert!(text.contains("    DBTDSTAT      2071"), "got {text}");
        assert!(text.contains("2022-04-09T00:00:06.500000Z"), "got {text}");
    }
}
