// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The contract every processing unit implements.
//!
//! A [`Stage`] takes ownership of an inbound queue and hands back an outbound
//! queue. Stages run as independent tokio tasks, so a pipeline of N stages is
//! an assembly line of N workers connected by bounded channels. Closing the
//! inbound queue is the only shutdown signal: every stage drains, flushes
//! whatever it buffers, and drops its sender so the closure reaches the next
//! stage.
//!
//! Stateless transforms implement [`Processor`] instead and are wrapped into a
//! worker by [`ProcessorStage`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::entry::Entry;

/// Capacity of every inter-stage queue. A full queue blocks the upstream worker.
pub const STAGE_QUEUE_CAPACITY: usize = 32;

pub type EntrySender = mpsc::Sender<Entry>;
pub type EntryReceiver = mpsc::Receiver<Entry>;

/// Creates a bounded queue between two workers.
#[must_use]
pub fn queue() -> (EntrySender, EntryReceiver) {
    mpsc::channel(STAGE_QUEUE_CAPACITY)
}

/// A unit that consumes a queue of entries and produces another.
///
/// `run` must be called from within a tokio runtime; it spawns the workers and
/// returns immediately. It may be called several times, each call starting an
/// independent set of workers over the same stage state.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, input: EntryReceiver) -> EntryReceiver;
}

/// A pure per-entry transform.
pub trait Processor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn process(&self, entry: &mut Entry);
}

/// Runs a [`Processor`] as a single worker reading, transforming and writing.
pub struct ProcessorStage<P> {
    processor: Arc<P>,
}

impl<P: Processor> ProcessorStage<P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }
}

impl<P: Processor> Stage for ProcessorStage<P> {
    fn name(&self) -> &'static str {
        self.processor.name()
    }

    fn run(&self, input: EntryReceiver) -> EntryReceiver {
        let processor = Arc::clone(&self.processor);
        run_with(input, move |mut entry| {
            processor.process(&mut entry);
            Some(entry)
        })
    }
}

/// Spawns a worker applying `f` to every inbound entry. Returning `None`
/// drops the entry.
pub fn run_with<F>(mut input: EntryReceiver, mut f: F) -> EntryReceiver
where
    F: FnMut(Entry) -> Option<Entry> + Send + 'static,
{
    let (tx, rx) = queue();
    tokio::spawn(async move {
        while let Some(entry) = input.recv().await {
            let Some(entry) = f(entry) else {
                continue;
            };
            if tx.send(entry).await.is_err() {
                debug!("downstream queue closed, stopping stage worker");
                return;
            }
        }
    });
    rx
}
