//! The dispatch loop.
//!
//! A single task owns the whole builder state. Each cycle:
//!
//! 1. polls every input channel once without blocking, decoding and merging
//!    whatever arrived
//! 2. serializes and emits the ready events of every class
//! 3. runs the timeout sweeper and emits what it evicted
//! 4. re-evaluates health and publishes a metrics snapshot
//!
//! If a cycle received nothing and evicted nothing, the loop sleeps for the
//! idle backoff before the next one.
//!
//! # Run control
//!
//! `Running -> Stopping -> Stopped`. [`RunControl::request_stop`] moves the
//! loop to `Stopping`; it keeps cycling for `stop_timeout_ms` so in-flight
//! fragments can land, then stops. With `flush_pending_on_stop` the events
//! still pending are emitted as incomplete on the way out.

use crate::assembler::{Event, EventAssembler, FragmentDecoder, TimeoutSweeper};
use crate::clock::{Clock, SystemClock};
use crate::config::BuilderConfig;
use crate::error::{AppResult, EvbError};
use crate::health::HealthTracker;
use crate::metrics::MetricsSnapshot;
use crate::serializer::EventSerializer;
use crate::transport::{EventSink, FragmentSource};
use bytes::Bytes;
use chrono::Utc;
use evb_format::EventTag;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not started, or finished.
    Stopped,
    /// Processing normally.
    Running,
    /// Stop requested, draining for the grace period.
    Stopping,
}

/// Handle for requesting a stop from another task.
#[derive(Debug, Clone)]
pub struct RunControl {
    stop: Arc<watch::Sender<bool>>,
}

impl RunControl {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { stop: Arc::new(tx) }, rx)
    }

    /// Ask the loop to stop. Idempotent.
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    /// True once a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    fn reset(&self) {
        self.stop.send_replace(false);
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Buffers received across all channels
    pub received: usize,
    /// Events emitted from ready sets
    pub emitted: usize,
    /// Events evicted by the sweeper
    pub evicted: usize,
}

impl CycleReport {
    /// Nothing arrived and nothing was forced out.
    pub fn is_idle(&self) -> bool {
        self.received == 0 && self.evicted == 0
    }
}

/// Owns the assembler and drives it from a source to a sink.
pub struct Dispatcher<S, K> {
    config: BuilderConfig,
    source: S,
    sink: K,
    clock: Arc<dyn Clock>,
    decoder: FragmentDecoder,
    assembler: EventAssembler,
    sweeper: TimeoutSweeper,
    serializer: EventSerializer,
    health: HealthTracker,
    state: RunState,
    control: RunControl,
    stop_rx: watch::Receiver<bool>,
    metrics_tx: watch::Sender<MetricsSnapshot>,
}

impl<S: FragmentSource, K: EventSink> Dispatcher<S, K> {
    /// Dispatcher using the system clock.
    ///
    /// The source must offer exactly one input channel per source a physics
    /// event collects.
    pub fn new(config: BuilderConfig, source: S, sink: K) -> AppResult<Self> {
        if source.num_channels() != config.num_channels {
            return Err(EvbError::Configuration(format!(
                "source has {} input channels but num_channels is {}",
                source.num_channels(),
                config.num_channels
            )));
        }
        let (control, stop_rx) = RunControl::new();
        let (metrics_tx, _) = watch::channel(MetricsSnapshot::default());
        Ok(Self {
            assembler: EventAssembler::new(&config),
            sweeper: TimeoutSweeper::new(&config),
            config,
            source,
            sink,
            clock: Arc::new(SystemClock),
            decoder: FragmentDecoder,
            serializer: EventSerializer,
            health: HealthTracker::default(),
            state: RunState::Stopped,
            control,
            stop_rx,
            metrics_tx,
        })
    }

    /// Replace the clock used for event aging.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Handle for stopping the loop.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// Receiver for the snapshot published after every cycle.
    pub fn metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        self.metrics_tx.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The assembler, for inspection.
    pub fn assembler(&self) -> &EventAssembler {
        &self.assembler
    }

    /// The output sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Start a run: reset counters and health, clear any stop request.
    ///
    /// Fails when `run_number` does not fit the event header; the
    /// dispatcher is left as it was.
    pub fn start(&mut self, run_number: u32) -> AppResult<()> {
        self.begin(run_number)?;
        self.control.reset();
        self.stop_rx.borrow_and_update();
        Ok(())
    }

    fn begin(&mut self, run_number: u32) -> AppResult<()> {
        self.assembler.start(run_number, Utc::now().timestamp())?;
        self.health.reset();
        self.state = RunState::Running;
        info!(run_number, channels = self.config.num_channels, "Run started");
        self.publish(self.clock.now_micros());
        Ok(())
    }

    /// Run one receive, emit and sweep cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        for channel in 0..self.source.num_channels() {
            match self.source.try_receive(channel) {
                Ok(Some(raw)) => {
                    report.received += 1;
                    self.ingest(channel, raw);
                }
                Ok(None) => {}
                Err(e) => {
                    self.assembler.record_receive_error();
                    warn!(channel, error = %e, "Receive failed");
                }
            }
        }

        for tag in EventTag::ALL {
            for event in self.assembler.take_ready(tag) {
                if self.emit(&event) {
                    report.emitted += 1;
                }
            }
        }

        let now = self.clock.now_micros();
        for event in self.sweeper.sweep(&mut self.assembler, now) {
            report.evicted += 1;
            self.emit(&event);
        }

        self.health.update(self.assembler.counters().timeouts);
        self.publish(now);
        report
    }

    fn ingest(&mut self, channel: usize, raw: Bytes) {
        let now = self.clock.now_micros();
        let decoded = self.decoder.decode(channel, raw, now);
        if let Some(e) = decoded.error {
            self.assembler.record_decode_error();
            warn!(channel, error = %e, "Could not decode fragment, marking corrupted");
        }
        let outcome = self.assembler.merge(decoded.fragment, now);
        debug!(channel, ?outcome, "Fragment merged");
    }

    fn emit(&mut self, event: &Event) -> bool {
        match self.serializer.emit(event, &mut self.sink) {
            Ok(_) => {
                self.assembler.record_emitted(event.tag());
                true
            }
            Err(e) => {
                self.assembler.record_send_failure();
                error!(
                    class = %event.tag(),
                    sequence_id = event.sequence_id(),
                    error = %e,
                    "Failed to send event"
                );
                false
            }
        }
    }

    fn publish(&self, now: u64) {
        self.metrics_tx
            .send_replace(self.assembler.snapshot(now, self.health.status()));
    }

    /// Drive cycles until stopped; returns the final snapshot.
    ///
    /// Starts a run with number 0 if none was started. A stop requested
    /// before that still applies.
    pub async fn run(&mut self) -> AppResult<MetricsSnapshot> {
        if self.state == RunState::Stopped {
            self.begin(0)?;
        }
        let idle_backoff = self.config.idle_backoff();
        let mut deadline: Option<Instant> = None;

        loop {
            if self.state == RunState::Running && *self.stop_rx.borrow() {
                self.state = RunState::Stopping;
                deadline = Some(Instant::now() + self.config.stop_timeout());
                info!(
                    grace_ms = self.config.stop_timeout_ms,
                    "Stop requested, draining"
                );
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }

            let report = self.run_cycle();
            if report.is_idle() {
                self.idle(idle_backoff, deadline).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        if self.config.flush_pending_on_stop {
            for event in self.sweeper.flush(&mut self.assembler) {
                self.emit(&event);
            }
        }
        self.state = RunState::Stopped;
        let now = self.clock.now_micros();
        self.publish(now);

        let snapshot = self.assembler.snapshot(now, self.health.status());
        info!(
            run_number = snapshot.run_number,
            pending = self.assembler.total_pending(),
            timeouts = snapshot.counters.timeouts,
            "Run stopped"
        );
        Ok(snapshot)
    }

    async fn idle(&mut self, backoff: Duration, deadline: Option<Instant>) {
        let sleep = match deadline {
            Some(d) => backoff.min(d.saturating_duration_since(Instant::now())),
            None => backoff,
        };
        if self.state == RunState::Running {
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.stop_rx.changed() => {}
            }
        } else {
            tokio::time::sleep(sleep).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::HealthStatus;
    use crate::transport::{memory_sink, memory_source};
    use evb_format::{decode_event, Fragment, MAX_RUN_NUMBER};
    use std::collections::VecDeque;

    fn physics(source_id: u32, event_id: u64) -> Bytes {
        Fragment::new(EventTag::Physics.as_u8(), source_id, event_id, 3, vec![0u8; 4]).to_bytes()
    }

    /// Single channel replaying a script of receive results.
    struct ScriptedSource {
        script: VecDeque<AppResult<Option<Bytes>>>,
    }

    impl FragmentSource for ScriptedSource {
        fn num_channels(&self) -> usize {
            1
        }

        fn try_receive(&mut self, _channel: usize) -> AppResult<Option<Bytes>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn cycle_emits_complete_event() {
        let (senders, source) = memory_source(2);
        let (sink, mut events) = memory_sink();
        let mut dispatcher = Dispatcher::new(BuilderConfig::with_channels(2), source, sink).unwrap();
        dispatcher.start(5).unwrap();

        senders[0].send(physics(0, 1)).unwrap();
        senders[1].send(physics(1, 1)).unwrap();
        let report = dispatcher.run_cycle();

        assert_eq!(report.received, 2);
        assert_eq!(report.emitted, 1);
        let out = events.drain();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag, EventTag::Physics);
        let decoded = decode_event(&out[0].data).unwrap();
        assert_eq!(decoded.header.run_number, 5);
        assert_eq!(decoded.header.event_id, 1);
    }

    #[test]
    fn idle_cycle_reports_idle() {
        let (_senders, source) = memory_source(1);
        let (sink, _events) = memory_sink();
        let mut dispatcher = Dispatcher::new(BuilderConfig::with_channels(1), source, sink).unwrap();
        dispatcher.start(1).unwrap();
        assert!(dispatcher.run_cycle().is_idle());
    }

    #[test]
    fn channel_count_mismatch_is_rejected() {
        let (_senders, source) = memory_source(2);
        let (sink, _events) = memory_sink();
        let result = Dispatcher::new(BuilderConfig::with_channels(3), source, sink);
        assert!(matches!(result, Err(EvbError::Configuration(_))));
    }

    #[test]
    fn run_number_wider_than_header_is_rejected() {
        let (senders, source) = memory_source(1);
        let (sink, mut events) = memory_sink();
        let mut dispatcher = Dispatcher::new(BuilderConfig::with_channels(1), source, sink).unwrap();

        let err = dispatcher.start(MAX_RUN_NUMBER + 1).unwrap_err();
        assert!(matches!(err, EvbError::RunNumber(_)));
        assert_eq!(dispatcher.state(), RunState::Stopped);

        dispatcher.start(MAX_RUN_NUMBER).unwrap();
        senders[0].send(physics(0, 1)).unwrap();
        assert_eq!(dispatcher.run_cycle().emitted, 1);
        assert_eq!(dispatcher.assembler().counters().send_failures, 0);
        let decoded = decode_event(&events.drain()[0].data).unwrap();
        assert_eq!(decoded.header.run_number, MAX_RUN_NUMBER);
    }

    #[test]
    fn send_failure_is_counted_not_fatal() {
        let (senders, source) = memory_source(1);
        let (sink, events) = memory_sink();
        drop(events);
        let mut dispatcher = Dispatcher::new(BuilderConfig::with_channels(1), source, sink).unwrap();
        dispatcher.start(1).unwrap();

        senders[0].send(physics(0, 1)).unwrap();
        let report = dispatcher.run_cycle();
        assert_eq!(report.emitted, 0);
        assert_eq!(dispatcher.assembler().counters().send_failures, 1);
        assert_eq!(dispatcher.assembler().counters().emitted, [0; evb_format::TAG_COUNT]);
    }

    #[test]
    fn receive_error_is_counted_not_fatal() {
        let source = ScriptedSource {
            script: VecDeque::from([
                Err(EvbError::transport(0, "socket reset")),
                Ok(Some(physics(0, 4))),
            ]),
        };
        let (sink, mut events) = memory_sink();
        let mut dispatcher = Dispatcher::new(BuilderConfig::with_channels(1), source, sink).unwrap();
        dispatcher.start(1).unwrap();

        let first = dispatcher.run_cycle();
        assert_eq!(first.received, 0);
        assert_eq!(dispatcher.assembler().counters().receive_errors, 1);
        assert_eq!(dispatcher.state(), RunState::Running);

        let second = dispatcher.run_cycle();
        assert_eq!(second.emitted, 1);
        assert_eq!(events.drain().len(), 1);
        assert_eq!(dispatcher.assembler().counters().receive_errors, 1);
    }

    #[test]
    fn metrics_published_after_cycle() {
        let (senders, source) = memory_source(2);
        let (sink, _events) = memory_sink();
        let clock = ManualClock::new(1_000);
        let mut dispatcher = Dispatcher::new(BuilderConfig::with_channels(2), source, sink)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let metrics = dispatcher.metrics();
        dispatcher.start(3).unwrap();

        senders[0].send(physics(0, 9)).unwrap();
        dispatcher.run_cycle();

        let snapshot = metrics.borrow().clone();
        assert_eq!(snapshot.run_number, 3);
        assert_eq!(snapshot.taken_at_micros, 1_000);
        assert_eq!(snapshot.pending(EventTag::Physics), 1);
    }

    #[test]
    fn sustained_timeouts_escalate_published_health() {
        let (senders, source) = memory_source(2);
        let (sink, _events) = memory_sink();
        let clock = ManualClock::new(0);
        let mut config = BuilderConfig::with_channels(2);
        config.timeout_ms = 10;
        let mut dispatcher = Dispatcher::new(config, source, sink)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let metrics = dispatcher.metrics();
        dispatcher.start(1).unwrap();

        // Each cycle leaves one incomplete event behind and times out the
        // one from the cycle before.
        let mut seen = Vec::new();
        for event_id in 1..=102 {
            senders[0].send(physics(0, event_id)).unwrap();
            dispatcher.run_cycle();
            let snapshot = metrics.borrow().clone();
            assert_eq!(snapshot.counters.timeouts, event_id - 1);
            seen.push((snapshot.counters.timeouts, snapshot.health));
            clock.advance(Duration::from_millis(20));
        }

        assert!(seen.contains(&(10, HealthStatus::Ok)));
        assert!(seen.contains(&(11, HealthStatus::Warn)));
        assert!(seen.contains(&(100, HealthStatus::Warn)));
        assert!(seen.contains(&(101, HealthStatus::Error)));
    }

    #[tokio::test]
    async fn stop_request_ends_run() {
        let (_senders, source) = memory_source(1);
        let (sink, _events) = memory_sink();
        let mut config = BuilderConfig::with_channels(1);
        config.stop_timeout_ms = 20;
        let mut dispatcher = Dispatcher::new(config, source, sink).unwrap();
        let control = dispatcher.control();
        dispatcher.start(1).unwrap();

        let handle = tokio::spawn(async move {
            let snapshot = dispatcher.run().await.unwrap();
            (dispatcher.state(), snapshot)
        });
        control.request_stop();

        let (state, snapshot) = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, RunState::Stopped);
        assert_eq!(snapshot.run_number, 1);
    }

    #[tokio::test]
    async fn stop_requested_before_run_is_kept() {
        let (_senders, source) = memory_source(1);
        let (sink, _events) = memory_sink();
        let mut config = BuilderConfig::with_channels(1);
        config.stop_timeout_ms = 20;
        let mut dispatcher = Dispatcher::new(config, source, sink).unwrap();
        dispatcher.control().request_stop();

        let snapshot = tokio::time::timeout(Duration::from_secs(1), dispatcher.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatcher.state(), RunState::Stopped);
        assert_eq!(snapshot.run_number, 0);
    }
}
