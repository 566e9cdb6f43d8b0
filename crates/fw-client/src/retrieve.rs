//! Per-client retrieval cycles.
//!
//! One cycle drains the pending protocol messages for a client and re-runs
//! the aggregation pipeline on the relevant ones. The pipeline itself is
//! synchronous; only message I/O suspends. Cancellation is cooperative and
//! checked only at the top of a cycle; an in-flight parse always
//! completes once started.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use fw_core::benchmark::{BenchmarkKey, BenchmarkStore};
use fw_core::correlate::{WorkUnitCollection, WorkUnitKey, build};
use fw_core::metrics::{BonusPolicy, CalcPolicy};
use fw_core::snapshot::{SlotInfoEntry, UnitSnapshot};
use fw_core::types::{ClientName, ProjectKey, SlotIdentifier};
use fw_core::{FahLog, LogFormat};
use fw_db::{HistoryDatabase, WorkUnitRow};

use crate::message::{ClientMessage, MessageSource, TransportError};
use crate::mirror::{LogMirror, WriteMode};
use crate::proteins::ProteinCatalog;
use crate::settings::{ClientSettings, SettingsError};

/// A heartbeat older than this multiple of the expected interval forces
/// teardown before the next cycle.
const HEARTBEAT_OVERDUE_FACTOR: u32 = 3;

/// Default expected heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Cooperative cancellation context for retrieval cycles.
///
/// Checked only at defined points (the top of a cycle), never inside the
/// synchronous parse.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Events observers receive from a monitored client.
///
/// Fired after the corresponding state mutation completes, never between
/// partial updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SlotsChanged { client: String },
    RetrievalFinished { client: String },
}

/// How one retrieval call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalOutcome {
    /// The cycle ran; `messages` were applied and `terminal_inserted`
    /// units landed in history.
    Completed {
        messages: usize,
        terminal_inserted: usize,
    },
    /// Another cycle for the same client was already in flight.
    Skipped,
    /// The cancellation token was set (or the heartbeat was overdue).
    Cancelled,
}

#[derive(Debug)]
struct ClientState {
    log: FahLog,
    slots: Vec<SlotInfoEntry>,
    snapshot: Vec<UnitSnapshot>,
    work_units: HashMap<u32, WorkUnitCollection>,
    /// Terminal units already inserted this process lifetime.
    recorded: HashSet<(WorkUnitKey, ProjectKey)>,
    /// Last frame id fed to the benchmark store, per unit.
    benchmarked: HashMap<WorkUnitKey, u32>,
    info: Option<serde_json::Value>,
    options: Option<serde_json::Value>,
}

impl ClientState {
    fn new(format: LogFormat) -> Self {
        Self {
            log: FahLog::new(format),
            slots: Vec::new(),
            snapshot: Vec::new(),
            work_units: HashMap::new(),
            recorded: HashSet::new(),
            benchmarked: HashMap::new(),
            info: None,
            options: None,
        }
    }
}

#[derive(Debug)]
struct HeartbeatState {
    last: Option<Instant>,
    interval: Duration,
}

/// One monitored client: reconstructed state plus retrieval machinery.
pub struct MonitoredClient {
    settings: ClientSettings,
    name: ClientName,
    state: Mutex<ClientState>,
    in_flight: AtomicBool,
    cancel: CancelToken,
    heartbeat: Mutex<HeartbeatState>,
    benchmarks: Arc<BenchmarkStore>,
    events: broadcast::Sender<ClientEvent>,
    mirror: Option<LogMirror>,
    calc_policy: CalcPolicy,
    bonus_policy: BonusPolicy,
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MonitoredClient {
    /// Creates a client from validated settings.
    pub fn new(
        settings: ClientSettings,
        benchmarks: Arc<BenchmarkStore>,
    ) -> Result<Self, SettingsError> {
        let name = settings.validate()?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            settings,
            name,
            state: Mutex::new(ClientState::new(LogFormat::FahClient)),
            in_flight: AtomicBool::new(false),
            cancel: CancelToken::new(),
            heartbeat: Mutex::new(HeartbeatState {
                last: None,
                interval: DEFAULT_HEARTBEAT_INTERVAL,
            }),
            benchmarks,
            events,
            mirror: None,
            calc_policy: CalcPolicy::default(),
            bonus_policy: BonusPolicy::default(),
        })
    }

    /// Attaches a persisted log mirror.
    #[must_use]
    pub fn with_mirror(mut self, mirror: LogMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Overrides the metric policies.
    #[must_use]
    pub const fn with_policies(mut self, calc: CalcPolicy, bonus: BonusPolicy) -> Self {
        self.calc_policy = calc;
        self.bonus_policy = bonus;
        self
    }

    /// Overrides the expected heartbeat interval.
    pub fn set_heartbeat_interval(&self, interval: Duration) {
        lock(&self.heartbeat).interval = interval;
    }

    pub fn name(&self) -> &ClientName {
        &self.name
    }

    pub const fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub const fn calc_policy(&self) -> CalcPolicy {
        self.calc_policy
    }

    pub const fn bonus_policy(&self) -> BonusPolicy {
        self.bonus_policy
    }

    pub fn benchmarks(&self) -> &BenchmarkStore {
        &self.benchmarks
    }

    /// Subscribes to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Records a heartbeat observation.
    pub fn mark_heartbeat(&self) {
        lock(&self.heartbeat).last = Some(Instant::now());
    }

    /// Whether the heartbeat is overdue (3x the expected interval).
    #[must_use]
    pub fn heartbeat_overdue(&self) -> bool {
        let heartbeat = lock(&self.heartbeat);
        heartbeat
            .last
            .is_some_and(|last| last.elapsed() > heartbeat.interval * HEARTBEAT_OVERDUE_FACTOR)
    }

    /// The latest slot info.
    pub fn slots(&self) -> Vec<SlotInfoEntry> {
        lock(&self.state).slots.clone()
    }

    /// The latest work unit collection for a slot.
    pub fn work_units(&self, slot_id: u32) -> Option<WorkUnitCollection> {
        lock(&self.state).work_units.get(&slot_id).cloned()
    }

    /// A read-only clone of the reconstructed log tree.
    pub fn log(&self) -> FahLog {
        lock(&self.state).log.clone()
    }

    /// The latest raw `Info` payload, if one arrived.
    pub fn info(&self) -> Option<serde_json::Value> {
        lock(&self.state).info.clone()
    }

    /// The latest raw `Options` payload, if one arrived.
    pub fn options(&self) -> Option<serde_json::Value> {
        lock(&self.state).options.clone()
    }

    /// Runs one retrieval cycle against a message source.
    ///
    /// Concurrency guard: a second call while one is in flight is a logged
    /// no-op, never queued. Transport errors end the cycle early; state
    /// already committed by earlier messages is unaffected. Repository
    /// errors are logged and never block other slots.
    pub async fn retrieve<S: MessageSource>(
        &self,
        source: &mut S,
        mut history: Option<&mut HistoryDatabase>,
        catalog: &ProteinCatalog,
    ) -> Result<RetrievalOutcome, TransportError> {
        if self.cancel.is_cancelled() {
            tracing::debug!(client = %self.name, "retrieval cancelled before start");
            return Ok(RetrievalOutcome::Cancelled);
        }
        if self.heartbeat_overdue() {
            tracing::warn!(client = %self.name, "heartbeat overdue, forcing teardown");
            self.cancel.cancel();
            return Ok(RetrievalOutcome::Cancelled);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(client = %self.name, "retrieval already in flight, skipping");
            return Ok(RetrievalOutcome::Skipped);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let mut messages = 0_usize;
        let mut terminal_inserted = 0_usize;

        loop {
            let message = match source.next_message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(
                        client = %self.name,
                        server = %self.settings.server,
                        error = %error,
                        "transport error, ending cycle early"
                    );
                    return Err(error);
                }
            };
            messages += 1;
            terminal_inserted += self
                .apply_message(message, history.as_deref_mut(), catalog)
                .await;
        }

        let _ = self.events.send(ClientEvent::RetrievalFinished {
            client: self.name.to_string(),
        });
        Ok(RetrievalOutcome::Completed {
            messages,
            terminal_inserted,
        })
    }

    /// Applies one message; returns how many terminal units were inserted.
    async fn apply_message(
        &self,
        message: ClientMessage,
        history: Option<&mut HistoryDatabase>,
        catalog: &ProteinCatalog,
    ) -> usize {
        match message {
            ClientMessage::Heartbeat => {
                self.mark_heartbeat();
                0
            }
            ClientMessage::Info(info) => {
                lock(&self.state).info = Some(info);
                0
            }
            ClientMessage::Options(options) => {
                lock(&self.state).options = Some(options);
                0
            }
            ClientMessage::SlotOptions(_) => 0,
            ClientMessage::SlotInfo(slots) => {
                lock(&self.state).slots = slots;
                let _ = self.events.send(ClientEvent::SlotsChanged {
                    client: self.name.to_string(),
                });
                0
            }
            ClientMessage::LogRestart(text) => {
                {
                    let mut state = lock(&self.state);
                    state.log.reset();
                    state.log.append(&text);
                }
                self.mirror_write(&text, WriteMode::Truncate).await;
                0
            }
            ClientMessage::LogUpdate(text) => {
                lock(&self.state).log.append(&text);
                self.mirror_write(&text, WriteMode::Append).await;
                0
            }
            ClientMessage::QueueInfo(snapshot) => self.apply_queue_info(snapshot, history, catalog),
        }
    }

    /// Rebuilds work units from the snapshot, then records terminal units
    /// and benchmark samples.
    fn apply_queue_info(
        &self,
        snapshot: Vec<UnitSnapshot>,
        mut history: Option<&mut HistoryDatabase>,
        catalog: &ProteinCatalog,
    ) -> usize {
        let mut state = lock(&self.state);
        let state = &mut *state;
        state.snapshot = snapshot;

        let mut slot_ids: Vec<u32> = state.slots.iter().map(|slot| slot.id).collect();
        for entry in &state.snapshot {
            if !slot_ids.contains(&entry.slot) {
                slot_ids.push(entry.slot);
            }
        }
        slot_ids.sort_unstable();

        let now = Utc::now();
        let mut inserted = 0_usize;

        for slot_id in slot_ids {
            let previous_current = state
                .work_units
                .get(&slot_id)
                .and_then(WorkUnitCollection::current_unit)
                .cloned();
            let collection = build(slot_id, &state.snapshot, &state.log, previous_current.as_ref());

            let slot = SlotIdentifier::new(self.name.clone(), slot_id);
            for unit in collection.units() {
                // New frame durations feed the rolling benchmark.
                let last_benchmarked = state.benchmarked.get(&unit.key).copied().unwrap_or(0);
                let fresh: Vec<_> = unit
                    .frames
                    .iter()
                    .filter(|frame| frame.id > last_benchmarked)
                    .filter_map(|frame| frame.duration)
                    .collect();
                if !fresh.is_empty() {
                    let key = BenchmarkKey {
                        slot: slot.clone(),
                        project: unit.project.project,
                    };
                    self.benchmarks.update(&key, &fresh);
                    if let Some(frame) = unit.last_frame() {
                        state.benchmarked.insert(unit.key, frame.id);
                    }
                }

                if !unit.is_terminal() {
                    continue;
                }
                let identity = (unit.key, unit.project);
                if state.recorded.contains(&identity) {
                    continue;
                }
                state.recorded.insert(identity);

                if let Some(db) = history.as_deref_mut() {
                    let credit = catalog.get(unit.project.project).credit;
                    let row = WorkUnitRow::from_unit(&slot, unit, now, credit);
                    match db.insert(&row) {
                        Ok(affected) => inserted += affected,
                        Err(error) => {
                            // Tolerated: history is best-effort and must
                            // never block other slots.
                            tracing::warn!(
                                client = %self.name,
                                slot_id,
                                error = %error,
                                "failed to insert terminal unit into history"
                            );
                        }
                    }
                }
            }

            state.work_units.insert(slot_id, collection);
        }

        inserted
    }

    async fn mirror_write(&self, text: &str, mode: WriteMode) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        if let Err(error) = mirror.write(text, mode).await {
            tracing::warn!(client = %self.name, error = %error, "log mirror write failed");
        }
    }
}

/// One client's retrieval work: the client, its message source, and an
/// optional owned history handle (one connection per task; the handle is
/// `Send` but not `Sync`).
pub struct RetrievalJob<S> {
    pub client: Arc<MonitoredClient>,
    pub source: S,
    pub history: Option<HistoryDatabase>,
}

/// Runs one retrieval cycle for every job.
///
/// With `serial`, cycles run strictly one after another; otherwise each
/// runs on its own task. Either way a single client never runs two cycles
/// concurrently: the per-client guard holds regardless of topology.
pub async fn retrieve_all<S>(
    jobs: Vec<RetrievalJob<S>>,
    catalog: Arc<ProteinCatalog>,
    serial: bool,
) -> Vec<(String, Result<RetrievalOutcome, TransportError>)>
where
    S: MessageSource + 'static,
{
    let mut results = Vec::with_capacity(jobs.len());

    if serial {
        for mut job in jobs {
            let name = job.client.name().to_string();
            let outcome = job
                .client
                .retrieve(&mut job.source, job.history.as_mut(), &catalog)
                .await;
            results.push((name, outcome));
        }
        return results;
    }

    let handles: Vec<_> = jobs
        .into_iter()
        .map(|mut job| {
            let catalog = Arc::clone(&catalog);
            let name = job.client.name().to_string();
            let handle = tokio::spawn(async move {
                job.client
                    .retrieve(&mut job.source, job.history.as_mut(), &catalog)
                    .await
            });
            (name, handle)
        })
        .collect();

    for (name, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(TransportError::Io(std::io::Error::other(join_error))),
        };
        results.push((name, outcome));
    }
    results
}

impl std::fmt::Debug for MonitoredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredClient")
            .field("name", &self.name)
            .field("server", &self.settings.server)
            .field("port", &self.settings.port)
            .finish_non_exhaustive()
    }
}

/// Locks a mutex, continuing through poisoning: state mutation is
/// all-or-nothing per message, so a panicked writer leaves valid state.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::QueuedSource;
    use fw_core::snapshot::UnitState;

    const FIXTURE_LOG: &str = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:04:31:WU01:FS00:Starting
12:04:33:WU01:FS00:0xa7:Project: 16814 (Run 0, Clone 1, Gen 2)
12:06:10:WU01:FS00:0xa7:Completed 2500 out of 250000 steps (1%)
12:07:55:WU01:FS00:0xa7:Completed 5000 out of 250000 steps (2%)
";

    fn client() -> MonitoredClient {
        MonitoredClient::new(
            ClientSettings::new("rig-a", "localhost", 36330),
            Arc::new(BenchmarkStore::new()),
        )
        .unwrap()
    }

    fn running_snapshot() -> Vec<UnitSnapshot> {
        vec![UnitSnapshot {
            id: 1,
            state: UnitState::Running,
            slot: 0,
            project: ProjectKey::new(16814, 0, 1, 2),
            assigned: Some("2024-03-01T12:04:00Z".parse().unwrap()),
            timeout: None,
            deadline: None,
            work_server: None,
            attempts: 0,
            frames_done: 2,
            total_frames: 100,
        }]
    }

    #[tokio::test]
    async fn full_cycle_builds_work_units() {
        let client = client();
        let catalog = ProteinCatalog::new();
        let mut source = QueuedSource::new(vec![
            ClientMessage::Heartbeat,
            ClientMessage::LogRestart(FIXTURE_LOG.to_string()),
            ClientMessage::QueueInfo(running_snapshot()),
        ]);

        let outcome = client.retrieve(&mut source, None, &catalog).await.unwrap();
        assert_eq!(
            outcome,
            RetrievalOutcome::Completed {
                messages: 3,
                terminal_inserted: 0
            }
        );

        let collection = client.work_units(0).expect("slot 0 built");
        let unit = collection.current_unit().expect("running unit is current");
        assert!(unit.log_found);
        assert_eq!(unit.frames.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_token_is_noop() {
        let client = client();
        client.cancel_token().cancel();
        let catalog = ProteinCatalog::new();
        let mut source = QueuedSource::new(vec![ClientMessage::Heartbeat]);

        let outcome = client.retrieve(&mut source, None, &catalog).await.unwrap();
        assert_eq!(outcome, RetrievalOutcome::Cancelled);
        // Nothing was consumed.
        assert_eq!(source.next_message().await.unwrap(), Some(ClientMessage::Heartbeat));
    }

    #[tokio::test]
    async fn concurrent_second_call_is_skipped() {
        let client = client();
        // Simulate an in-flight cycle by setting the guard directly.
        client.in_flight.store(true, Ordering::Release);

        let catalog = ProteinCatalog::new();
        let mut source = QueuedSource::new(vec![ClientMessage::Heartbeat]);
        let outcome = client.retrieve(&mut source, None, &catalog).await.unwrap();
        assert_eq!(outcome, RetrievalOutcome::Skipped);

        // The guard is untouched: the in-flight cycle still owns it.
        assert!(client.in_flight.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn overdue_heartbeat_forces_cancellation() {
        let client = client();
        client.set_heartbeat_interval(Duration::from_millis(1));
        client.mark_heartbeat();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let catalog = ProteinCatalog::new();
        let mut source = QueuedSource::new(vec![ClientMessage::Heartbeat]);
        let outcome = client.retrieve(&mut source, None, &catalog).await.unwrap();

        assert_eq!(outcome, RetrievalOutcome::Cancelled);
        assert!(client.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn transport_error_preserves_committed_state() {
        let client = client();
        let catalog = ProteinCatalog::new();
        let mut source = QueuedSource::new(vec![ClientMessage::LogRestart(
            FIXTURE_LOG.to_string(),
        )]);
        source.push_error(TransportError::Closed);

        let result = client.retrieve(&mut source, None, &catalog).await;
        assert!(result.is_err());

        // The log applied before the error survives.
        assert_eq!(client.log().runs.len(), 1);
        // And the guard was released for the next cycle.
        assert!(!client.in_flight.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn terminal_unit_lands_in_history_once() {
        let finished_log = format!(
            "{FIXTURE_LOG}14:55:59:WU01:FS00:FahCore returned: FINISHED_UNIT (100 = 0x64)\n"
        );
        let client = client();
        let catalog = ProteinCatalog::new();
        let mut db = HistoryDatabase::open_in_memory().unwrap();

        let mut source = QueuedSource::new(vec![
            ClientMessage::LogRestart(finished_log),
            ClientMessage::QueueInfo(running_snapshot()),
            // A second snapshot in the same cycle must not re-insert.
            ClientMessage::QueueInfo(running_snapshot()),
        ]);
        let outcome = client
            .retrieve(&mut source, Some(&mut db), &catalog)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RetrievalOutcome::Completed {
                messages: 3,
                terminal_inserted: 1
            }
        );
        assert_eq!(db.count_completed("rig-a:00", None).unwrap(), 1);
    }

    #[tokio::test]
    async fn benchmarks_receive_new_frame_durations() {
        let client = client();
        let catalog = ProteinCatalog::new();
        let mut source = QueuedSource::new(vec![
            ClientMessage::LogRestart(FIXTURE_LOG.to_string()),
            ClientMessage::QueueInfo(running_snapshot()),
        ]);
        client.retrieve(&mut source, None, &catalog).await.unwrap();

        let key = BenchmarkKey {
            slot: SlotIdentifier::new(ClientName::new("rig-a").unwrap(), 0),
            project: 16814,
        };
        // One inter-frame duration was observable (12:06:10 -> 12:07:55).
        assert_eq!(
            client.benchmarks().average_frame_time(&key),
            Some(chrono::Duration::seconds(105))
        );
    }

    #[tokio::test]
    async fn retrieve_all_parallel_and_serial() {
        for serial in [true, false] {
            let catalog = Arc::new(ProteinCatalog::new());
            let jobs: Vec<RetrievalJob<QueuedSource>> = ["rig-a", "rig-b"]
                .into_iter()
                .map(|name| RetrievalJob {
                    client: Arc::new(
                        MonitoredClient::new(
                            ClientSettings::new(name, "localhost", 36330),
                            Arc::new(BenchmarkStore::new()),
                        )
                        .unwrap(),
                    ),
                    source: QueuedSource::new(vec![
                        ClientMessage::LogRestart(FIXTURE_LOG.to_string()),
                        ClientMessage::QueueInfo(running_snapshot()),
                    ]),
                    history: None,
                })
                .collect();

            let results = retrieve_all(jobs, Arc::clone(&catalog), serial).await;
            assert_eq!(results.len(), 2);
            for (name, outcome) in results {
                assert!(
                    matches!(outcome, Ok(RetrievalOutcome::Completed { messages: 2, .. })),
                    "client {name} (serial={serial}) got {outcome:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn events_fire_after_mutation() {
        let client = client();
        let mut events = client.subscribe();
        let catalog = ProteinCatalog::new();

        let mut source = QueuedSource::new(vec![ClientMessage::SlotInfo(Vec::new())]);
        client.retrieve(&mut source, None, &catalog).await.unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::SlotsChanged {
                client: "rig-a".to_string()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::RetrievalFinished {
                client: "rig-a".to_string()
            }
        );
    }
}
