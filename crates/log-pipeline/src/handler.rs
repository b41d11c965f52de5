// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The producer side of a running pipeline.

use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinHandle;
use tracing::error;

use crate::entry::Entry;
use crate::stage::EntrySender;

/// Feeds entries into a pipeline started with
/// [`Pipeline::wrap`](crate::pipeline::Pipeline::wrap).
///
/// Dropping the handler closes the pipeline input without waiting for it to
/// drain; call [`EntryHandler::stop`] to wait.
pub struct EntryHandler {
    sender: EntrySender,
    forwarder: JoinHandle<()>,
}

impl EntryHandler {
    pub(crate) fn new(sender: EntrySender, forwarder: JoinHandle<()>) -> Self {
        Self { sender, forwarder }
    }

    /// A sender into the pipeline. Clones must be dropped before
    /// [`EntryHandler::stop`] can complete.
    #[must_use]
    pub fn sender(&self) -> EntrySender {
        self.sender.clone()
    }

    /// Sends one entry, waiting while the first queue is full.
    pub async fn send(&self, entry: Entry) -> Result<(), SendError<Entry>> {
        self.sender.send(entry).await
    }

    /// Closes the pipeline input and waits until every stage has flushed and
    /// the last output entry has been forwarded.
    pub async fn stop(self) {
        drop(self.sender);
        if let Err(e) = self.forwarder.await {
            error!("pipeline forwarder failed: {e}");
        }
    }
}
