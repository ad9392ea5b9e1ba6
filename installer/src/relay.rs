// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ordered delivery of subprocess output to the operator console.
//!
//! Rendering happens on one dedicated thread that owns the [`DisplaySink`].
//! Producers send a render request carrying a oneshot sender and wait for the
//! render thread to fire it, so [`OutputRelay::relay`] returns only once the
//! line is on screen. Lines from a single producer therefore render in the
//! order that producer relayed them; lines from different producers (say, a
//! child's stdout and stderr readers) may interleave in any order.

use slog::{Logger, o, warn};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

// Each producer has at most one request in flight, so this only needs to
// cover the number of concurrent producers.
const RENDER_CHANNEL_CAPACITY: usize = 64;

/// A named display surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Panel {
    Install,
    Upgrade,
}

impl Panel {
    pub fn name(self) -> &'static str {
        match self {
            Panel::Install => "install",
            Panel::Upgrade => "upgrade",
        }
    }
}

/// Something that can show a line of output on a panel.
///
/// Only the render thread ever calls `render`, so implementations need no
/// synchronization of their own.
pub trait DisplaySink: Send + 'static {
    fn render(&mut self, panel: Panel, line: &str) -> io::Result<()>;
}

/// Writes each line to a terminal, prefixed with its panel name.
pub struct TerminalSink<W> {
    out: W,
}

impl TerminalSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send + 'static> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send + 'static> DisplaySink for TerminalSink<W> {
    fn render(&mut self, panel: Panel, line: &str) -> io::Result<()> {
        writeln!(self.out, "[{:>7}] {line}", panel.name())?;
        self.out.flush()
    }
}

/// Keeps every rendered line in memory.
///
/// Clones share the same buffer, so a caller can keep one clone to inspect
/// what the render thread has shown.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<(Panel, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything rendered so far, in render order.
    pub fn lines(&self) -> Vec<(Panel, String)> {
        self.lines.lock().unwrap().clone()
    }

    /// Lines rendered on `panel`, in render order.
    pub fn lines_for(&self, panel: Panel) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == panel)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl DisplaySink for MemorySink {
    fn render(&mut self, panel: Panel, line: &str) -> io::Result<()> {
        self.lines.lock().unwrap().push((panel, line.to_owned()));
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("the display render loop has shut down")]
    Closed,
}

#[derive(Debug)]
struct RenderRequest {
    panel: Panel,
    line: String,
    rendered: oneshot::Sender<()>,
}

/// Producer handle for the render loop. Cheap to clone; the render loop exits
/// once every clone has been dropped.
#[derive(Clone, Debug)]
pub struct OutputRelay {
    tx: mpsc::Sender<RenderRequest>,
}

impl OutputRelay {
    /// Start the render loop on its own thread, taking ownership of `sink`.
    pub fn spawn<S: DisplaySink>(
        log: &Logger,
        sink: S,
    ) -> (OutputRelay, RenderLoop<S>) {
        let log = log.new(o!("component" => "OutputRelay"));
        let (tx, rx) = mpsc::channel(RENDER_CHANNEL_CAPACITY);
        let handle =
            tokio::task::spawn_blocking(move || render_loop(log, sink, rx));
        (OutputRelay { tx }, RenderLoop { handle })
    }

    /// Render `line` on `panel`, returning once it has been rendered.
    pub async fn relay(
        &self,
        panel: Panel,
        line: impl Into<String>,
    ) -> Result<(), RelayError> {
        let (rendered, rendered_rx) = oneshot::channel();
        self.tx
            .send(RenderRequest { panel, line: line.into(), rendered })
            .await
            .map_err(|_| RelayError::Closed)?;
        rendered_rx.await.map_err(|_| RelayError::Closed)
    }
}

/// The running render loop.
#[derive(Debug)]
pub struct RenderLoop<S> {
    handle: JoinHandle<S>,
}

impl<S: DisplaySink> RenderLoop<S> {
    /// Wait for the loop to drain (every [`OutputRelay`] must have been
    /// dropped) and get the sink back.
    pub async fn finish(self) -> S {
        self.handle.await.expect("render loop panicked")
    }
}

fn render_loop<S: DisplaySink>(
    log: Logger,
    mut sink: S,
    mut rx: mpsc::Receiver<RenderRequest>,
) -> S {
    while let Some(request) = rx.blocking_recv() {
        if let Err(error) = sink.render(request.panel, &request.line) {
            warn!(
                log, "failed to render line";
                "panel" => request.panel.name(),
                "error" => %error,
            );
        }
        // The producer may have given up waiting; that's fine.
        _ = request.rendered.send(());
    }
    sink
}
