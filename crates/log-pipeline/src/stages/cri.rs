// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container runtime (CRI) log parsing and partial-line joining.
//!
//! A CRI line looks like `2019-04-30T02:12:41.8443515Z stdout P some text`.
//! The third field tags the line as partial (`P`) or full (`F`). Partials are
//! buffered per stream and prepended to the next full line of that stream.

use std::sync::Arc;
use std::time::SystemTime;

use chrono::DateTime;
use hashbrown::HashMap;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::entry::{Entry, Fingerprint, Value};
use crate::errors::ConfigError;
use crate::stage::{queue, EntryReceiver, EntrySender, Stage};
use crate::util::deserialize_optional_byte_size;

const DEFAULT_MAX_PARTIAL_LINES: usize = 100;
const CRI_PATTERN: &str =
    r"^(?s)(?P<time>\S+?) (?P<stream>stdout|stderr) (?P<flags>\S+?) (?P<content>.*)$";
const PARTIAL_FLAG: &str = "P";

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CriConfig {
    #[serde(default = "default_max_partial_lines")]
    pub max_partial_lines: usize,
    /// Zero means unlimited.
    #[serde(default, deserialize_with = "deserialize_optional_byte_size")]
    pub max_partial_line_size: Option<u64>,
    #[serde(default)]
    pub max_partial_line_size_truncate: bool,
}

impl Default for CriConfig {
    fn default() -> Self {
        Self {
            max_partial_lines: DEFAULT_MAX_PARTIAL_LINES,
            max_partial_line_size: None,
            max_partial_line_size_truncate: false,
        }
    }
}

fn default_max_partial_lines() -> usize {
    DEFAULT_MAX_PARTIAL_LINES
}

struct Settings {
    pattern: Regex,
    max_partial_lines: usize,
    truncate_to: Option<usize>,
}

impl Settings {
    /// Parses a CRI line in place. Returns whether the entry is a partial.
    fn parse(&self, entry: &mut Entry) -> bool {
        let Some(captures) = self.pattern.captures(&entry.line) else {
            debug!("line is not in CRI format, passing it through");
            return false;
        };
        let field = |name: &str| captures.name(name).map_or("", |m| m.as_str()).to_string();
        let (time, stream, flags, content) =
            (field("time"), field("stream"), field("flags"), field("content"));

        match DateTime::parse_from_rfc3339(&time) {
            Ok(parsed) => entry.timestamp = SystemTime::from(parsed),
            Err(error) => debug!(%error, time = %time, "failed to parse CRI timestamp, keeping entry time"),
        }
        let partial = flags == PARTIAL_FLAG;
        entry.labels.insert("stream".to_string(), stream.clone());
        entry.extracted.insert("time".to_string(), Value::String(time));
        entry.extracted.insert("stream".to_string(), Value::String(stream));
        entry.extracted.insert("flags".to_string(), Value::String(flags));
        entry
            .extracted
            .insert("content".to_string(), Value::String(content.clone()));
        entry.line = content;
        partial
    }

    fn truncate(&self, entry: &mut Entry) {
        let Some(limit) = self.truncate_to else {
            return;
        };
        if entry.line.len() > limit {
            let mut cut = limit;
            while !entry.line.is_char_boundary(cut) {
                cut -= 1;
            }
            entry.line.truncate(cut);
        }
    }
}

pub struct CriStage {
    settings: Arc<Settings>,
}

impl CriStage {
    pub fn new(config: &CriConfig) -> Result<Self, ConfigError> {
        if config.max_partial_lines == 0 {
            return Err(ConfigError::CriInvalidMaxPartialLines);
        }
        let pattern = Regex::new(CRI_PATTERN).map_err(|source| ConfigError::regex(CRI_PATTERN, source))?;
        let truncate_to = match config.max_partial_line_size {
            Some(size) if size > 0 && config.max_partial_line_size_truncate => {
                Some(usize::try_from(size).unwrap_or(usize::MAX))
            }
            _ => None,
        };
        Ok(Self {
            settings: Arc::new(Settings {
                pattern,
                max_partial_lines: config.max_partial_lines,
                truncate_to,
            }),
        })
    }
}

impl Stage for CriStage {
    fn name(&self) -> &'static str {
        "cri"
    }

    fn run(&self, input: EntryReceiver) -> EntryReceiver {
        let (out, rx) = queue();
        tokio::spawn(run_cri(input, out, Arc::clone(&self.settings)));
        rx
    }
}

async fn send_all(out: &EntrySender, entries: impl IntoIterator<Item = Entry>) -> bool {
    for entry in entries {
        if out.send(entry).await.is_err() {
            debug!("downstream queue closed, stopping cri stage");
            return false;
        }
    }
    true
}

async fn run_cri(mut input: EntryReceiver, out: EntrySender, settings: Arc<Settings>) {
    let mut partials: HashMap<Fingerprint, Entry> = HashMap::new();

    while let Some(mut entry) = input.recv().await {
        let partial = settings.parse(&mut entry);
        let key = entry.fingerprint();

        if partial {
            if partials.len() >= settings.max_partial_lines {
                warn!(
                    threshold = settings.max_partial_lines,
                    "cri stage: partial lines upperbound exceeded, flushing them as single lines"
                );
                let pending = std::mem::take(&mut partials);
                settings.truncate(&mut entry);
                partials.insert(key, entry);
                if !send_all(&out, pending.into_values()).await {
                    return;
                }
                continue;
            }
            if let Some(previous) = partials.remove(&key) {
                entry.line.insert_str(0, &previous.line);
            }
            settings.truncate(&mut entry);
            partials.insert(key, entry);
            continue;
        }

        if let Some(previous) = partials.remove(&key) {
            entry.line.insert_str(0, &previous.line);
            settings.truncate(&mut entry);
        }
        if !send_all(&out, [entry]).await {
            return;
        }
    }

    if !partials.is_empty() {
        debug!(pending = partials.len(), "cri input closed, flushing incomplete partial lines");
        send_all(&out, partials.into_values()).await;
    }
}
