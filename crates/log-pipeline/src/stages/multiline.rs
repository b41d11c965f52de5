// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Joins consecutive lines of one stream into a single entry.
//!
//! A dispatcher fans entries out to one worker per stream fingerprint. Each
//! worker holds at most one open block, started by a line matching
//! `firstline`. The block is flushed when the next `firstline` arrives, when
//! it reaches `max_lines`, when `max_wait_time` passes without input on that
//! stream, or when the stage input closes.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::entry::{Entry, Fingerprint};
use crate::errors::ConfigError;
use crate::stage::{queue, EntryReceiver, EntrySender, Stage};
use crate::util::deserialize_duration;

const DEFAULT_MAX_LINES: usize = 128;
const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultilineConfig {
    #[serde(default)]
    pub firstline: String,
    /// Lines per block before a forced flush. Zero means the default of 128.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default = "default_max_wait_time", deserialize_with = "deserialize_duration")]
    pub max_wait_time: Duration,
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}

fn default_max_wait_time() -> Duration {
    DEFAULT_MAX_WAIT_TIME
}

struct Settings {
    firstline: Regex,
    max_lines: usize,
    max_wait_time: Duration,
}

pub struct MultilineStage {
    settings: Arc<Settings>,
}

impl MultilineStage {
    pub fn new(config: &MultilineConfig) -> Result<Self, ConfigError> {
        if config.firstline.is_empty() {
            return Err(ConfigError::MultilineFirstLineRequired);
        }
        if config.max_wait_time.is_zero() {
            return Err(ConfigError::MultilineInvalidWaitTime);
        }
        let firstline = Regex::new(&config.firstline)
            .map_err(|source| ConfigError::regex(&config.firstline, source))?;
        Ok(Self {
            settings: Arc::new(Settings {
                firstline,
                max_lines: if config.max_lines == 0 {
                    DEFAULT_MAX_LINES
                } else {
                    config.max_lines
                },
                max_wait_time: config.max_wait_time,
            }),
        })
    }
}

impl Stage for MultilineStage {
    fn name(&self) -> &'static str {
        "multiline"
    }

    fn run(&self, mut input: EntryReceiver) -> EntryReceiver {
        let settings = Arc::clone(&self.settings);
        let (out, rx) = queue();
        tokio::spawn(async move {
            let mut streams: HashMap<Fingerprint, EntrySender> = HashMap::new();
            while let Some(entry) = input.recv().await {
                let stream = streams.entry(entry.fingerprint()).or_insert_with(|| {
                    let (tx, stream_rx) = queue();
                    tokio::spawn(run_stream(stream_rx, out.clone(), Arc::clone(&settings)));
                    tx
                });
                if stream.send(entry).await.is_err() {
                    debug!("multiline stream worker stopped, stopping dispatcher");
                    break;
                }
            }
            // Closing every stream queue makes each worker flush and exit.
            // The output closes once the last worker drops its sender.
            debug!(streams = streams.len(), "multiline input closed, flushing streams");
        });
        rx
    }
}

struct Block {
    first: Entry,
    lines: usize,
}

impl Block {
    fn new(first: Entry) -> Self {
        Self { first, lines: 1 }
    }

    fn push(&mut self, line: &str) {
        self.first.line.push('\n');
        self.first.line.push_str(line);
        self.lines += 1;
    }
}

async fn flush(block: &mut Option<Block>, out: &EntrySender) -> bool {
    match block.take() {
        Some(block) => out.send(block.first).await.is_ok(),
        None => true,
    }
}

async fn run_stream(mut input: EntryReceiver, out: EntrySender, settings: Arc<Settings>) {
    let mut block: Option<Block> = None;
    loop {
        let next = if block.is_some() {
            match tokio::time::timeout(settings.max_wait_time, input.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    if !flush(&mut block, &out).await {
                        return;
                    }
                    continue;
                }
            }
        } else {
            input.recv().await
        };
        let Some(entry) = next else {
            break;
        };

        if settings.firstline.is_match(&entry.line) {
            if !flush(&mut block, &out).await {
                return;
            }
            block = Some(Block::new(entry));
        } else if let Some(open) = block.as_mut() {
            open.push(&entry.line);
        } else if out.send(entry).await.is_err() {
            return;
        }

        if block.as_ref().is_some_and(|b| b.lines >= settings.max_lines) && !flush(&mut block, &out).await {
            return;
        }
    }
    flush(&mut block, &out).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{label_set, LabelSet};
    use crate::stage::test_utils::{collect, new_entry, process_entries};
    use std::time::SystemTime;

    fn stage(firstline: &str, max_lines: usize, max_wait_time: Duration) -> MultilineStage {
        MultilineStage::new(&MultilineConfig {
            firstline: firstline.to_string(),
            max_lines,
            max_wait_time,
        })
        .expect("valid multiline config")
    }

    fn entry(labels: &LabelSet, line: &str) -> Entry {
        new_entry(&[], labels.clone(), line, SystemTime::now())
    }

    fn lines(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.line.as_str()).collect()
    }

    #[test]
    fn test_validation() {
        let valid = MultilineConfig {
            firstline: "^START".into(),
            max_lines: 10,
            max_wait_time: Duration::from_secs(1),
        };
        assert!(matches!(
            MultilineStage::new(&MultilineConfig {
                firstline: String::new(),
                ..valid.clone()
            }),
            Err(ConfigError::MultilineFirstLineRequired)
        ));
        assert!(matches!(
            MultilineStage::new(&MultilineConfig {
                max_wait_time: Duration::ZERO,
                ..valid.clone()
            }),
            Err(ConfigError::MultilineInvalidWaitTime)
        ));
        assert!(matches!(
            MultilineStage::new(&MultilineConfig {
                firstline: "(".into(),
                ..valid
            }),
            Err(ConfigError::Regex { .. })
        ));
    }

    #[test]
    fn test_defaults() {
        let config: MultilineConfig =
            serde_json::from_value(serde_json::json!({"firstline": "^\\d"})).unwrap();
        assert_eq!(config.max_lines, 128);
        assert_eq!(config.max_wait_time, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_lines_means_default() {
        let stage = stage("^START", 0, Duration::from_secs(3));
        let labels = label_set([("app", "a")]);
        let out = process_entries(
            &stage,
            vec![entry(&labels, "START A"), entry(&labels, "B"), entry(&labels, "C")],
        )
        .await;
        assert_eq!(lines(&out), vec!["START A\nB\nC"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_firstline_starts_blocks() {
        let stage = stage("^START", 128, Duration::from_secs(3));
        let labels = label_set([("app", "a")]);
        let out = process_entries(
            &stage,
            vec![
                entry(&labels, "START A"),
                entry(&labels, "B"),
                entry(&labels, "START C"),
                entry(&labels, "START D"),
            ],
        )
        .await;
        assert_eq!(lines(&out), vec!["START A\nB", "START C", "START D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_keeps_first_entry_metadata() {
        let stage = stage("^START", 128, Duration::from_secs(3));
        let labels = label_set([("app", "a")]);
        let first = entry(&labels, "START");
        let first_ts = first.timestamp;
        let mut second = entry(&labels, "continued");
        second.timestamp = first_ts + Duration::from_secs(1);
        let out = process_entries(&stage, vec![first, second]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, first_ts);
        assert_eq!(out[0].labels, labels);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_before_firstline_pass_through() {
        let stage = stage("^START", 128, Duration::from_secs(3));
        let labels = label_set([("app", "a")]);
        let out = process_entries(
            &stage,
            vec![entry(&labels, "orphan 1"), entry(&labels, "orphan 2"), entry(&labels, "START x")],
        )
        .await;
        assert_eq!(lines(&out), vec!["orphan 1", "orphan 2", "START x"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_lines_forces_flush() {
        let stage = stage("^START", 2, Duration::from_secs(3));
        let labels = label_set([("app", "a")]);
        let out = process_entries(
            &stage,
            vec![
                entry(&labels, "START"),
                entry(&labels, "1"),
                entry(&labels, "2"),
                entry(&labels, "3"),
            ],
        )
        .await;
        assert_eq!(lines(&out), vec!["START\n1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_time_flushes_idle_block() {
        let stage = stage("^START", 128, Duration::from_millis(100));
        let labels = label_set([("app", "a")]);
        let (tx, rx) = queue();
        let mut out = stage.run(rx);

        tx.send(entry(&labels, "START")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let flushed = out.recv().await.expect("block flushed by timeout");
        assert_eq!(flushed.line, "START");

        tx.send(entry(&labels, "late")).await.unwrap();
        drop(tx);
        let rest = collect(out).await;
        assert_eq!(lines(&rest), vec!["late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_within_wait_time_extends_block() {
        let stage = stage("^START", 128, Duration::from_millis(100));
        let labels = label_set([("app", "a")]);
        let (tx, rx) = queue();
        let out = stage.run(rx);

        tx.send(entry(&labels, "START")).await.unwrap();
        for line in ["a", "b", "c"] {
            tokio::time::sleep(Duration::from_millis(80)).await;
            tx.send(entry(&labels, line)).await.unwrap();
        }
        drop(tx);
        assert_eq!(lines(&collect(out).await), vec!["START\na\nb\nc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_are_independent() {
        let stage = stage("^START", 128, Duration::from_secs(3));
        let a = label_set([("stream", "a")]);
        let b = label_set([("stream", "b")]);
        let out = process_entries(
            &stage,
            vec![
                entry(&a, "START a1"),
                entry(&b, "START b1"),
                entry(&a, "a2"),
                entry(&b, "b2"),
                entry(&a, "START a3"),
            ],
        )
        .await;
        let mut got = lines(&out);
        got.sort_unstable();
        assert_eq!(got, vec!["START a1\na2", "START a3", "START b1\nb2"]);

        let a_lines: Vec<_> = out
            .iter()
            .filter(|e| e.labels == a)
            .map(|e| e.line.as_str())
            .collect();
        assert_eq!(a_lines, vec!["START a1\na2", "START a3"]);
    }
}
