//! Tokio driver for a [`FrameSynchronizer`].
//!
//! One spawned task owns the engine. Producers talk to it through a cloneable
//! [`SyncHandle`] backed by an unbounded channel, so a push never waits on
//! the tick. Focus and statistics are published as immutable snapshots on
//! `watch` channels after every command and tick.

use std::sync::Arc;
use std::time::Duration;

use camsync_models::{
    Entity, FocusState, InboundMessage, RawFrame, SourceId, SyncConfigPatch,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{SyncError, SyncResult};
use crate::stats::StatisticsSnapshot;
use crate::synchronizer::FrameSynchronizer;

/// Work items accepted by the runtime task.
#[derive(Debug, Clone)]
pub enum Command {
    Frame(RawFrame),
    SelectFocus { source_id: SourceId, entity: Entity },
    ClearFocus,
    UpdateConfig(SyncConfigPatch),
    RemoveSource(SourceId),
}

impl From<InboundMessage> for Command {
    fn from(message: InboundMessage) -> Self {
        match message {
            InboundMessage::Frame(frame) => Command::Frame(frame),
            InboundMessage::SelectFocus { source_id, entity } => {
                Command::SelectFocus { source_id, entity }
            }
            InboundMessage::ClearFocus => Command::ClearFocus,
            InboundMessage::UpdateConfig(patch) => Command::UpdateConfig(patch),
            InboundMessage::RemoveSource { source_id } => Command::RemoveSource(source_id),
        }
    }
}

/// Cloneable producer/reader side of a running synchronizer.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    focus: watch::Receiver<Option<Arc<FocusState>>>,
    statistics: watch::Receiver<StatisticsSnapshot>,
}

impl SyncHandle {
    /// Queue a command; fails once the runtime has stopped.
    pub fn send(&self, command: Command) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::RuntimeStopped)
    }

    pub fn push_frame(&self, frame: RawFrame) -> SyncResult<()> {
        self.send(Command::Frame(frame))
    }

    pub fn select_focus(&self, source_id: SourceId, entity: Entity) -> SyncResult<()> {
        self.send(Command::SelectFocus { source_id, entity })
    }

    pub fn clear_focus(&self) -> SyncResult<()> {
        self.send(Command::ClearFocus)
    }

    pub fn update_config(&self, patch: SyncConfigPatch) -> SyncResult<()> {
        self.send(Command::UpdateConfig(patch))
    }

    pub fn remove_source(&self, source_id: SourceId) -> SyncResult<()> {
        self.send(Command::RemoveSource(source_id))
    }

    /// Forward a decoded transport message.
    pub fn dispatch(&self, message: InboundMessage) -> SyncResult<()> {
        self.send(message.into())
    }

    /// Focus as of the last processed command or tick.
    pub fn focus(&self) -> Option<Arc<FocusState>> {
        self.focus.borrow().clone()
    }

    /// Receiver notified on every focus change.
    pub fn watch_focus(&self) -> watch::Receiver<Option<Arc<FocusState>>> {
        self.focus.clone()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.borrow().clone()
    }

    pub fn buffer_depth(&self, source_id: &SourceId) -> usize {
        self.statistics.borrow().buffer_depth(source_id)
    }
}

/// A synchronizer running on its own tokio task.
pub struct SyncRuntime {
    handle: SyncHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<FrameSynchronizer>,
}

impl SyncRuntime {
    /// Spawn the tick loop. Must be called from within a tokio runtime.
    pub fn start(engine: FrameSynchronizer) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (focus_tx, focus_rx) = watch::channel(engine.focus());
        let (stats_tx, stats_rx) = watch::channel(engine.statistics(now()));

        let task = tokio::spawn(run(
            engine,
            commands_rx,
            shutdown_rx,
            Publisher {
                focus: focus_tx,
                statistics: stats_tx,
            },
        ));

        Self {
            handle: SyncHandle {
                commands: commands_tx,
                focus: focus_rx,
                statistics: stats_rx,
            },
            shutdown: shutdown_tx,
            task,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Stop ticking and hand the engine back with its buffers intact.
    ///
    /// Commands queued before the call are still applied; later sends fail
    /// with [`SyncError::RuntimeStopped`].
    pub async fn stop(self) -> SyncResult<FrameSynchronizer> {
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|e| {
            error!("Sync runtime task failed: {}", e);
            SyncError::RuntimeStopped
        })
    }
}

struct Publisher {
    focus: watch::Sender<Option<Arc<FocusState>>>,
    statistics: watch::Sender<StatisticsSnapshot>,
}

impl Publisher {
    fn publish(&self, engine: &FrameSynchronizer) {
        let focus = engine.focus();
        self.focus.send_if_modified(move |current| {
            let changed = match (current.as_ref(), focus.as_ref()) {
                (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                (None, None) => false,
                _ => true,
            };
            if changed {
                *current = focus;
            }
            changed
        });
        self.statistics.send_replace(engine.statistics(now()));
    }
}

async fn run(
    mut engine: FrameSynchronizer,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
    publisher: Publisher,
) -> FrameSynchronizer {
    let mut period = engine.config().tick_interval();
    let mut ticker = new_ticker(period);
    info!(tick_ms = period.as_millis() as u64, "Sync runtime started");

    loop {
        tokio::select! {
            // Ticks come before commands so a busy producer cannot delay them
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown signal received, stopping sync runtime");
                    break;
                }
            }
            _ = ticker.tick() => {
                engine.tick(now());

                let next = engine.config().tick_interval();
                if next != period {
                    info!(
                        from_ms = period.as_millis() as u64,
                        to_ms = next.as_millis() as u64,
                        "Tick interval changed"
                    );
                    period = next;
                    ticker = new_ticker(period);
                }
                publisher.publish(&engine);
            }
            Some(command) = commands.recv() => {
                apply(&mut engine, command);
                publisher.publish(&engine);
            }
        }
    }

    commands.close();
    while let Ok(command) = commands.try_recv() {
        apply(&mut engine, command);
    }
    publisher.publish(&engine);

    engine.log_summary();
    engine
}

fn apply(engine: &mut FrameSynchronizer, command: Command) {
    // Failures below are already reported through the sync-error handlers
    match command {
        Command::Frame(frame) => {
            let _ = engine.on_raw_frame(frame, now());
        }
        Command::SelectFocus { source_id, entity } => {
            let _ = engine.select_focus(&source_id, &entity);
        }
        Command::ClearFocus => {
            engine.clear_focus();
        }
        Command::UpdateConfig(patch) => {
            let _ = engine.update_config(&patch);
        }
        Command::RemoveSource(source_id) => {
            if let Err(e) = engine.remove_source(&source_id) {
                debug!(source = %source_id, "Remove ignored");
                engine.events().emit_error(&e);
            }
        }
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Current time from the tokio clock, so paused-time tests stay deterministic.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
