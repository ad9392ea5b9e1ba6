// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivery of install lifecycle events.

use installer_common::LifecycleEvent;
use slog::{Logger, info};
use std::sync::{Arc, Mutex};

/// Receives lifecycle events as an install progresses.
///
/// Handlers must not block: they are called inline from the orchestrator.
/// Anything slow (a webhook POST, say) should be queued and sent elsewhere.
pub trait LifecycleHandler: Send + Sync {
    fn handle(&self, event: LifecycleEvent);
}

/// Records events in the structured log.
#[derive(Clone, Debug)]
pub struct LogLifecycleHandler {
    log: Logger,
}

impl LogLifecycleHandler {
    pub fn new(log: &Logger) -> Self {
        Self { log: log.new(slog::o!("component" => "LifecycleEvents")) }
    }
}

impl LifecycleHandler for LogLifecycleHandler {
    fn handle(&self, event: LifecycleEvent) {
        info!(self.log, "lifecycle event"; "event" => event.as_str());
    }
}

/// Keeps every event it is handed, in order. Clones share the record.
#[derive(Clone, Debug, Default)]
pub struct RecordingLifecycleHandler {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingLifecycleHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl LifecycleHandler for RecordingLifecycleHandler {
    fn handle(&self, event: LifecycleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl<H: LifecycleHandler + ?Sized> LifecycleHandler for Arc<H> {
    fn handle(&self, event: LifecycleEvent) {
        (**self).handle(event)
    }
}
