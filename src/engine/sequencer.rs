//! Test sequencer state machine
//!
//! A run walks `Prerun -> Running -> Postrun` once per test iteration, for
//! every selected test and every suite repeat, and ends in `Finished` or
//! `Stopped` before going back to `Idle`. The run itself lives on its own
//! tokio task and owns its [`RunState`]; callers only see [`Progress`]
//! snapshots and the phase stream.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::capture::{CaptureRelay, CaptureStatus, Severity};
use crate::common::{Error, Result};
use crate::definition::{Command, CommandKind, Precondition, Test, TestStore, TestSuite};
use crate::report::naming;
use crate::transport::{CommandOutcome, Directive, Targets, Transport, TransportStatus};

use super::progress::{Progress, ProgressKind, RunPhase, Subscribers};
use super::state::{RunRequest, RunState, RunTicket, Selection};

/// Construction options of a [`Sequencer`]
#[derive(Debug, Clone)]
pub struct SequencerOptions {
    /// Directory the capture file is requested in
    pub reports_dir: PathBuf,
    /// ECUs connected for the duration of a run
    pub targets: Targets,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from(crate::common::paths::DEFAULT_REPORTS_DIR),
            targets: Targets::All,
        }
    }
}

/// No stop requested, the run may still finish normally
const SIGNAL_NONE: u8 = 0;
/// Stop requested, the run ends `Stopped`
const SIGNAL_STOP: u8 = 1;
/// The run is closing as `Finished`, stop requests are refused
const SIGNAL_CLOSING: u8 = 2;

/// Control state shared between the sequencer handle and the run task
struct Control {
    phase_tx: watch::Sender<RunPhase>,
    active: AtomicBool,
    signal: AtomicU8,
    subscribers: Subscribers,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Control {
    fn set_phase(&self, phase: RunPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            tracing::trace!(from = %previous, to = %phase, "Phase changed");
        }
    }

    fn cancelled(&self) -> bool {
        self.signal.load(Ordering::Acquire) == SIGNAL_STOP
    }

    /// Returns `Ok(false)` when a stop was already pending
    fn request_stop(&self) -> Result<bool> {
        match self.signal.compare_exchange(
            SIGNAL_NONE,
            SIGNAL_STOP,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(true),
            Err(SIGNAL_STOP) => Ok(false),
            Err(_) => Err(Error::invalid_state("stop", RunPhase::Finished)),
        }
    }

    /// Settle how the run ends, true when a stop got in first
    ///
    /// From here on `stop` is refused: the terminal event is about to go out.
    fn close(&self) -> bool {
        self.signal
            .compare_exchange(
                SIGNAL_NONE,
                SIGNAL_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err_and(|signal| signal == SIGNAL_STOP)
    }

    fn publish(&self, progress: Progress) {
        tracing::debug!(
            kind = %progress.kind,
            test = %progress.test_id,
            command = progress.command_idx,
            failed = progress.failed,
            "Progress"
        );
        self.subscribers.publish(&progress);
    }

    /// Back to Idle, ready for the next start
    ///
    /// `start` is accepted before `Idle` is published. A start that gets in
    /// between has already moved the phase on, which is kept.
    fn release(&self) {
        self.signal.store(SIGNAL_NONE, Ordering::Release);
        self.active.store(false, Ordering::Release);
        self.phase_tx.send_if_modified(|phase| {
            if matches!(*phase, RunPhase::Finished | RunPhase::Stopped) {
                *phase = RunPhase::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Reset after the run task died without closing the run
    fn abandon(&self) {
        self.signal.store(SIGNAL_NONE, Ordering::Release);
        self.set_phase(RunPhase::Idle);
        self.active.store(false, Ordering::Release);
    }
}

/// Drives test runs against a transport and a capture relay
pub struct Sequencer {
    store: Arc<TestStore>,
    transport: Arc<dyn Transport>,
    capture: Arc<dyn CaptureRelay>,
    options: SequencerOptions,
    control: Arc<Control>,
}

impl Sequencer {
    pub fn new(
        store: Arc<TestStore>,
        transport: Arc<dyn Transport>,
        capture: Arc<dyn CaptureRelay>,
        options: SequencerOptions,
    ) -> Self {
        let (phase_tx, _) = watch::channel(RunPhase::Idle);
        Self {
            store,
            transport,
            capture,
            options,
            control: Arc::new(Control {
                phase_tx,
                active: AtomicBool::new(false),
                signal: AtomicU8::new(SIGNAL_NONE),
                subscribers: Subscribers::default(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Start a run on a new tokio task
    ///
    /// Only valid while idle. The run works on the test list loaded at this
    /// moment; later reloads of the store do not affect it. Must be called
    /// from within a tokio runtime.
    pub fn start(&self, request: RunRequest) -> Result<RunTicket> {
        if self
            .control
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::invalid_state("start", self.phase()));
        }

        let (suite, selection, ticket) = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.control.active.store(false, Ordering::Release);
                return Err(e);
            }
        };

        self.control.set_phase(RunPhase::Prerun);
        self.capture
            .emit_value2("Tests start", &ticket.label, Severity::Info);

        tracing::info!(
            label = %ticket.label,
            tests = selection.len(),
            suite_repeat = request.suite_repeat,
            test_repeat = request.test_repeat,
            "Run started"
        );

        let run = Run {
            control: Arc::clone(&self.control),
            transport: Arc::clone(&self.transport),
            capture: Arc::clone(&self.capture),
            targets: self.options.targets.clone(),
            suite,
            selection,
            state: RunState::new(&request),
            label: ticket.label.clone(),
            capture_file: ticket.capture_file.clone(),
            last_command: String::new(),
        };
        let handle = tokio::spawn(run.execute());
        *self.control.task.lock() = Some(handle);

        Ok(ticket)
    }

    fn prepare(&self, request: &RunRequest) -> Result<(Arc<TestSuite>, Vec<usize>, RunTicket)> {
        request.validate()?;

        let suite = self.store.snapshot();
        let selection = request.resolve(&suite);
        if selection.is_empty() {
            return Err(Error::EmptySelection);
        }

        let label = match request.selection {
            Selection::SingleTest(index) => suite
                .get(index)
                .map(|t| t.id.clone())
                .unwrap_or_else(|| suite.base_name()),
            Selection::AllTests => suite.base_name(),
        };
        let started_at = Local::now();
        let capture_file = naming::capture_path(&self.options.reports_dir, &started_at, &label);

        let ticket = RunTicket {
            label,
            started_at,
            capture_file,
            suite: Arc::clone(&suite),
        };
        Ok((suite, selection, ticket))
    }

    /// Request cancellation of the active run
    ///
    /// Returns immediately. The run stops at the next command boundary; a
    /// command already in flight is allowed to complete. A stop that arrives
    /// while a finished run is closing still ends it as stopped.
    pub fn stop(&self) -> Result<()> {
        if !self.control.active.load(Ordering::Acquire) {
            return Err(Error::invalid_state("stop", self.phase()));
        }
        if self.control.request_stop()? {
            tracing::info!("Stop requested");
        }
        Ok(())
    }

    /// Wait until the active run task is done
    pub async fn wait(&self) {
        let handle = self.control.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Run task failed: {}", e);
                self.control.abandon();
            }
        }
    }

    /// Receive every progress event from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Progress> {
        self.control.subscribers.subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.control.phase_tx.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.control.phase_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.control.active.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &Arc<TestStore> {
        &self.store
    }
}

/// How a run ended
#[derive(Clone, Copy)]
enum Ending {
    Finished,
    Stopped,
}

/// How a single test iteration ended
enum TestEnd {
    Completed,
    Interrupted,
}

/// One run, executed on its own task
struct Run {
    control: Arc<Control>,
    transport: Arc<dyn Transport>,
    capture: Arc<dyn CaptureRelay>,
    targets: Targets,
    suite: Arc<TestSuite>,
    selection: Vec<usize>,
    state: RunState,
    label: String,
    capture_file: PathBuf,
    /// Text of the last completed command, reported on stop
    last_command: String,
}

impl Run {
    async fn execute(mut self) {
        self.open_suite().await;
        let ending = self.run_suite().await;
        self.close_suite(ending).await;
    }

    async fn open_suite(&self) {
        self.directive(Directive::NewFile(self.capture_file.clone()))
            .await;
        if let Err(e) = self.transport.connect(&self.targets).await {
            tracing::warn!(error = %e, "Failed to connect ECUs");
        }
    }

    async fn run_suite(&mut self) -> Ending {
        let suite = Arc::clone(&self.suite);
        let selection = self.selection.clone();

        for suite_repeat in 0..self.state.suite_repeat_total {
            self.state.suite_repeat_idx = suite_repeat;

            for &index in &selection {
                let Some(test) = suite.get(index) else {
                    continue;
                };

                for test_repeat in 0..self.state.test_repeat_total {
                    if self.control.cancelled() {
                        return Ending::Stopped;
                    }
                    self.state
                        .begin_test(index, &test.id, test_repeat, test.size());

                    if let TestEnd::Interrupted = self.run_test(test).await {
                        return Ending::Stopped;
                    }
                }
            }
        }

        Ending::Finished
    }

    async fn run_test(&mut self, test: &Test) -> TestEnd {
        self.control.set_phase(RunPhase::Prerun);
        self.publish(ProgressKind::Started, &test.description, false);
        self.capture
            .emit_value2("test start", &test.id, Severity::Info);
        tracing::info!(
            test = %test.id,
            repeat = self.state.test_repeat_idx + 1,
            of = self.state.test_repeat_total,
            "Test started"
        );

        let reason = match self.unmet_precondition(test) {
            Some(unmet) => {
                self.state.counters.failed_commands += 1;
                self.capture
                    .emit_value3("test step failed", "prerun", &unmet, Severity::Fatal);
                tracing::warn!(test = %test.id, "{}", unmet);
                Some(unmet)
            }
            None => {
                self.control.set_phase(RunPhase::Running);
                match self.run_commands(test).await {
                    Some(0) => None,
                    Some(failures) => Some(format!(
                        "{} of {} commands failed",
                        failures,
                        test.size()
                    )),
                    None => {
                        self.teardown(test).await;
                        return TestEnd::Interrupted;
                    }
                }
            }
        };

        self.teardown(test).await;
        if self.control.cancelled() {
            return TestEnd::Interrupted;
        }

        match reason {
            None => {
                self.state.counters.success += 1;
                self.publish(ProgressKind::EndSuccess, "", false);
                self.capture
                    .emit_value2("test end success", &test.id, Severity::Info);
                tracing::info!(test = %test.id, "Test passed");
            }
            Some(reason) => {
                self.state.counters.failed += 1;
                self.publish(ProgressKind::EndFailed, &reason, true);
                self.capture
                    .emit_value2("test failed", &test.id, Severity::Fatal);
                self.directive(Directive::Marker).await;
                tracing::warn!(test = %test.id, %reason, "Test failed");
            }
        }

        TestEnd::Completed
    }

    /// Run the commands of a test in order
    ///
    /// Returns the number of failed commands, `None` when a stop was
    /// observed.
    async fn run_commands(&mut self, test: &Test) -> Option<u32> {
        let mut failures = 0;

        for (idx, command) in test.commands.iter().enumerate() {
            if self.control.cancelled() {
                return None;
            }
            self.state.command_idx = idx;

            let step = idx.to_string();
            self.capture
                .emit_value3("test step", &step, command.text(), Severity::Info);

            let outcome = self.execute_command(command).await;
            let failed = !outcome.is_passed();
            if failed {
                failures += 1;
                self.state.counters.failed_commands += 1;
                self.capture
                    .emit_value3("test step failed", &step, command.text(), Severity::Fatal);
                tracing::warn!(test = %test.id, step = idx, %command, %outcome, "Command failed");
            } else {
                tracing::debug!(test = %test.id, step = idx, %command, %outcome, "Command passed");
            }

            self.last_command = command.text().to_string();
            if self.control.cancelled() {
                return None;
            }
            self.publish(ProgressKind::Step, command.text(), failed);
        }

        Some(failures)
    }

    /// Postrun: teardown commands, outcomes are only logged
    async fn teardown(&mut self, test: &Test) {
        self.control.set_phase(RunPhase::Postrun);
        for command in &test.teardown {
            let outcome = self.execute_command(command).await;
            if !outcome.is_passed() {
                tracing::warn!(test = %test.id, %command, %outcome, "Teardown command failed");
            }
        }
    }

    async fn execute_command(&self, command: &Command) -> CommandOutcome {
        match command.kind() {
            CommandKind::Wait(duration) => {
                tokio::time::sleep(*duration).await;
                CommandOutcome::passed()
            }
            CommandKind::Marker(text) => {
                self.capture
                    .emit_value2("marker", text.as_deref().unwrap_or(""), Severity::Info);
                match self.transport.send_directive(&Directive::Marker).await {
                    Ok(()) => CommandOutcome::passed(),
                    Err(e) => CommandOutcome::failed(e.to_string()),
                }
            }
            CommandKind::Assertion { .. } | CommandKind::Action { .. } => {
                self.transport.send_command(command).await
            }
        }
    }

    fn unmet_precondition(&self, test: &Test) -> Option<String> {
        test.requires.iter().find_map(|precondition| match precondition {
            Precondition::Transport => {
                let status = self.transport.status();
                (status != TransportStatus::Connected)
                    .then(|| format!("precondition {} not met: link is {}", precondition, status))
            }
            Precondition::Capture => {
                let status = self.capture.status();
                (status != CaptureStatus::Connected)
                    .then(|| format!("precondition {} not met: relay is {}", precondition, status))
            }
        })
    }

    async fn close_suite(&self, mut ending: Ending) {
        if self.control.cancelled() {
            ending = Ending::Stopped;
        }
        match ending {
            Ending::Finished => {
                self.control.set_phase(RunPhase::Finished);
                self.capture
                    .emit_value2("Tests end", &self.label, Severity::Info);
            }
            Ending::Stopped => self.mark_stopped(),
        }

        if let Err(e) = self.transport.disconnect(&self.targets).await {
            tracing::warn!(error = %e, "Failed to disconnect ECUs");
        }
        self.directive(Directive::ClearFile).await;

        // a stop accepted while closing still ends the run as stopped
        if let Ending::Finished = ending {
            if self.control.close() {
                ending = Ending::Stopped;
                self.mark_stopped();
            }
        }

        let counters = self.state.counters;
        match ending {
            Ending::Finished => {
                let label = self.label.clone();
                self.publish(ProgressKind::SuiteEnd, &label, false);
                tracing::info!(
                    success = counters.success,
                    failed = counters.failed,
                    failed_commands = counters.failed_commands,
                    "Run finished"
                );
            }
            Ending::Stopped => {
                self.publish(ProgressKind::Stopped, &self.last_command, false);
                tracing::info!(
                    success = counters.success,
                    failed = counters.failed,
                    failed_commands = counters.failed_commands,
                    "Run stopped"
                );
            }
        }

        self.control.release();
    }

    fn mark_stopped(&self) {
        self.control.set_phase(RunPhase::Stopped);
        self.capture.emit_value("test stopped", Severity::Fatal);
    }

    fn publish(&self, kind: ProgressKind, text: &str, failed: bool) {
        self.control
            .publish(self.state.snapshot(kind, text, failed));
    }

    /// Directives are best effort, a refused one does not fail the run
    async fn directive(&self, directive: Directive) {
        if let Err(e) = self.transport.send_directive(&directive).await {
            tracing::warn!(%directive, error = %e, "Directive not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RecordingCapture;
    use crate::transport::ScriptedTransport;
    use async_trait::async_trait;
    use std::sync::OnceLock;
    use std::time::Duration;

    const TWO_TESTS: &str = r#"
tests:
  - id: T1
    description: Boot
    commands:
      - power on
      - find ECU1 APP1 CTX1 boot complete
      - power off
  - id: T2
    description: Banner
    commands:
      - expect ECU1 APP1 CTX1 banner
"#;

    struct Rig {
        sequencer: Sequencer,
        transport: Arc<ScriptedTransport>,
        capture: Arc<RecordingCapture>,
    }

    fn rig_with(yaml: &str, transport: ScriptedTransport) -> Rig {
        let store = TestStore::new();
        assert!(store.load_str(yaml, Some(PathBuf::from("suite.yaml"))).is_empty());

        let transport = Arc::new(transport);
        let capture = Arc::new(RecordingCapture::new());
        let sequencer = Sequencer::new(
            Arc::new(store),
            transport.clone(),
            capture.clone(),
            SequencerOptions::default(),
        );
        Rig {
            sequencer,
            transport,
            capture,
        }
    }

    fn rig(yaml: &str) -> Rig {
        rig_with(yaml, ScriptedTransport::connected())
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<Progress>) -> Vec<Progress> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("run did not end")
                .expect("channel closed");
            let terminal = event.kind.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    fn kinds(events: &[Progress]) -> Vec<ProgressKind> {
        events.iter().map(|e| e.kind).collect()
    }

    /// Transport that notes the sequencer phase of everything sent
    struct PhaseTap {
        inner: ScriptedTransport,
        phase: OnceLock<watch::Receiver<RunPhase>>,
        seen: Mutex<Vec<(String, RunPhase)>>,
        /// Holds back directives sent once the run has finished
        closing_delay: Option<Duration>,
    }

    impl PhaseTap {
        fn new(closing_delay: Option<Duration>) -> Self {
            Self {
                inner: ScriptedTransport::connected(),
                phase: OnceLock::new(),
                seen: Mutex::new(Vec::new()),
                closing_delay,
            }
        }

        fn current(&self) -> RunPhase {
            self.phase.get().map(|rx| *rx.borrow()).unwrap_or_default()
        }

        fn note(&self, text: String) -> RunPhase {
            let phase = self.current();
            self.seen.lock().push((text, phase));
            phase
        }

        fn phases(&self) -> Vec<RunPhase> {
            self.seen.lock().iter().map(|(_, phase)| *phase).collect()
        }
    }

    #[async_trait]
    impl Transport for PhaseTap {
        async fn open(&self) -> Result<()> {
            self.inner.open().await
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }

        async fn send_command(&self, command: &Command) -> CommandOutcome {
            self.note(command.text().to_string());
            self.inner.send_command(command).await
        }

        async fn send_directive(&self, directive: &Directive) -> Result<()> {
            let phase = self.note(directive.to_string());
            if let (RunPhase::Finished, Some(delay)) = (phase, self.closing_delay) {
                tokio::time::sleep(delay).await;
            }
            self.inner.send_directive(directive).await
        }

        fn status(&self) -> TransportStatus {
            self.inner.status()
        }

        fn subscribe_status(&self) -> watch::Receiver<TransportStatus> {
            self.inner.subscribe_status()
        }
    }

    fn tapped(yaml: &str, tap: PhaseTap) -> (Sequencer, Arc<PhaseTap>, Arc<RecordingCapture>) {
        let store = TestStore::new();
        assert!(store.load_str(yaml, None).is_empty());

        let tap = Arc::new(tap);
        let capture = Arc::new(RecordingCapture::new());
        let sequencer = Sequencer::new(
            Arc::new(store),
            tap.clone(),
            capture.clone(),
            SequencerOptions::default(),
        );
        assert!(tap.phase.set(sequencer.subscribe_phase()).is_ok());
        (sequencer, tap, capture)
    }

    /// Every distinct phase value the stream delivers, up to Idle
    fn observe_phases(sequencer: &Sequencer) -> tokio::task::JoinHandle<Vec<RunPhase>> {
        let mut rx = sequencer.subscribe_phase();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let phase = *rx.borrow_and_update();
                seen.push(phase);
                if phase == RunPhase::Idle {
                    break;
                }
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_all_tests_pass() {
        use ProgressKind::*;

        let rig = rig(TWO_TESTS);
        let mut rx = rig.sequencer.subscribe();
        let ticket = rig.sequencer.start(RunRequest::all()).unwrap();
        assert_eq!(ticket.label, "suite");

        let events = collect(&mut rx).await;
        assert_eq!(
            kinds(&events),
            vec![Started, Step, Step, Step, EndSuccess, Started, Step, EndSuccess, SuiteEnd]
        );
        assert_eq!(events[0].test_id, "T1");
        assert_eq!(events[5].test_id, "T2");

        let last = events.last().unwrap();
        assert_eq!(last.counters.success, 2);
        assert_eq!(last.counters.failed, 0);
        assert_eq!(last.counters.failed_commands, 0);

        rig.sequencer.wait().await;
        assert_eq!(rig.sequencer.phase(), RunPhase::Idle);
        assert!(!rig.sequencer.is_running());
    }

    #[tokio::test]
    async fn test_step_indices_stay_in_range() {
        let rig = rig(TWO_TESTS);
        let mut rx = rig.sequencer.subscribe();
        rig.sequencer.start(RunRequest::all()).unwrap();

        let events = collect(&mut rx).await;
        for step in events.iter().filter(|e| e.kind == ProgressKind::Step) {
            assert!(step.command_idx < step.command_total);
        }
        let t1_steps: Vec<_> = events
            .iter()
            .filter(|e| e.kind == ProgressKind::Step && e.test_id == "T1")
            .map(|e| (e.command_idx, e.command_total))
            .collect();
        assert_eq!(t1_steps, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[tokio::test]
    async fn test_failed_command_with_test_repeat() {
        use ProgressKind::*;

        let rig = rig("tests:\n  - id: T1\n    commands: [power on, power off]\n");
        rig.transport.fail_on("power off");

        let mut rx = rig.sequencer.subscribe();
        let ticket = rig
            .sequencer
            .start(RunRequest::single(0).with_test_repeat(2))
            .unwrap();
        assert_eq!(ticket.label, "T1");

        let events = collect(&mut rx).await;
        assert_eq!(
            kinds(&events),
            vec![Started, Step, Step, EndFailed, Started, Step, Step, EndFailed, SuiteEnd]
        );
        let failed_steps: Vec<_> = events
            .iter()
            .filter(|e| e.kind == Step)
            .map(|e| e.failed)
            .collect();
        assert_eq!(failed_steps, vec![false, true, false, true]);
        assert_eq!(events[4].test_repeat_idx, 1);

        let last = events.last().unwrap();
        assert_eq!(last.counters.success, 0);
        assert_eq!(last.counters.failed, 2);
        assert_eq!(last.counters.failed_commands, 2);

        // every failing command escalates, every failed test is marked
        let labels = rig.capture.labels();
        assert_eq!(labels.iter().filter(|l| *l == "test step failed").count(), 2);
        assert_eq!(labels.iter().filter(|l| *l == "test failed").count(), 2);
        assert_eq!(
            rig.transport.sent().iter().filter(|s| *s == "marker").count(),
            2
        );
    }

    #[tokio::test]
    async fn test_stop_after_first_step() {
        let rig = rig_with(
            "tests:\n  - id: T1\n    commands: [step 1, step 2, step 3, step 4, step 5]\n",
            ScriptedTransport::connected().with_delay(Duration::from_millis(50)),
        );
        let mut rx = rig.sequencer.subscribe();
        rig.sequencer.start(RunRequest::all()).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, ProgressKind::Started);
        let step = rx.recv().await.unwrap();
        assert_eq!(step.kind, ProgressKind::Step);
        rig.sequencer.stop().unwrap();

        let rest = collect(&mut rx).await;
        assert_eq!(rest.last().unwrap().kind, ProgressKind::Stopped);
        assert!(!rest
            .iter()
            .any(|e| matches!(e.kind, ProgressKind::EndSuccess | ProgressKind::EndFailed)));
        assert!(rest.iter().filter(|e| e.kind == ProgressKind::Step).count() < 4);

        rig.sequencer.wait().await;
        assert_eq!(rig.sequencer.phase(), RunPhase::Idle);
        assert!(rig.capture.labels().contains(&"test stopped".to_string()));
        assert_eq!(rig.transport.sent().last().unwrap(), "clearFile");
    }

    #[tokio::test]
    async fn test_stop_during_teardown_of_last_test() {
        let rig = rig_with(
            "tests:\n  - id: T1\n    commands: [power on]\n    teardown: [power off]\n",
            ScriptedTransport::connected().with_delay(Duration::from_millis(200)),
        );
        let mut rx = rig.sequencer.subscribe();
        rig.sequencer.start(RunRequest::all()).unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, ProgressKind::Started);
        assert_eq!(rx.recv().await.unwrap().kind, ProgressKind::Step);
        // the teardown command is in flight now
        rig.sequencer.stop().unwrap();

        let rest = collect(&mut rx).await;
        assert_eq!(kinds(&rest), vec![ProgressKind::Stopped]);
        assert_eq!(rest[0].text, "power on");
        assert_eq!(rest[0].counters.success, 0);

        rig.sequencer.wait().await;
        assert!(rig.transport.sent().contains(&"power off".to_string()));
        let labels = rig.capture.labels();
        assert!(labels.contains(&"test stopped".to_string()));
        assert!(!labels.contains(&"test end success".to_string()));
        assert!(!labels.contains(&"Tests end".to_string()));
    }

    #[tokio::test]
    async fn test_stop_during_teardown_skips_test_end() {
        let rig = rig_with(
            "tests:\n  - id: T1\n    commands: [power on]\n    teardown: [power off]\n  - id: T2\n    commands: [noop]\n",
            ScriptedTransport::connected().with_delay(Duration::from_millis(200)),
        );
        let mut rx = rig.sequencer.subscribe();
        rig.sequencer.start(RunRequest::all()).unwrap();

        rx.recv().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, ProgressKind::Step);
        rig.sequencer.stop().unwrap();

        let rest = collect(&mut rx).await;
        assert_eq!(kinds(&rest), vec![ProgressKind::Stopped]);
        assert!(!rig.transport.sent().contains(&"noop".to_string()));
    }

    #[tokio::test]
    async fn test_stop_while_closing_ends_stopped() {
        let (sequencer, tap, capture) = tapped(
            "tests:\n  - id: T1\n    commands: [power on]\n",
            PhaseTap::new(Some(Duration::from_millis(200))),
        );
        let mut rx = sequencer.subscribe();
        let mut phase = sequencer.subscribe_phase();
        sequencer.start(RunRequest::all()).unwrap();

        phase
            .wait_for(|p| *p == RunPhase::Finished)
            .await
            .unwrap();
        sequencer.stop().unwrap();

        let events = collect(&mut rx).await;
        assert_eq!(
            kinds(&events),
            vec![ProgressKind::Started, ProgressKind::Step, ProgressKind::EndSuccess, ProgressKind::Stopped]
        );
        assert_eq!(events[3].text, "power on");

        sequencer.wait().await;
        assert_eq!(capture.labels().last().unwrap(), "test stopped");
        assert_eq!(tap.inner.sent().last().unwrap(), "clearFile");
        assert!(matches!(sequencer.stop(), Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_phase_stream_follows_run() {
        use RunPhase::*;

        let (sequencer, tap, _) = tapped(
            "tests:\n  - id: T1\n    commands: [power on, power off]\n    teardown: [reset]\n",
            PhaseTap::new(None),
        );
        let observer = observe_phases(&sequencer);
        let mut rx = sequencer.subscribe();
        sequencer.start(RunRequest::all()).unwrap();
        collect(&mut rx).await;
        sequencer.wait().await;

        let sent: Vec<String> = tap.seen.lock().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(
            &sent[1..],
            ["connectAllEcu", "power on", "power off", "reset", "disconnectAllEcu", "clearFile"]
        );
        assert_eq!(
            tap.phases(),
            vec![Prerun, Prerun, Running, Running, Postrun, Finished, Finished]
        );

        // the stream keeps only the latest phase, Idle always comes last
        let observed = observer.await.unwrap();
        assert_eq!(observed.last(), Some(&Idle));
        assert!(!observed.contains(&Stopped));
        assert_eq!(sequencer.phase(), Idle);
    }

    #[tokio::test]
    async fn test_phase_stream_skips_running_on_unmet_precondition() {
        use RunPhase::*;

        let (sequencer, tap, capture) = tapped(
            "tests:\n  - id: T1\n    requires: [capture]\n    commands: [power on]\n    teardown: [power off]\n",
            PhaseTap::new(None),
        );
        capture.set_status(CaptureStatus::Listening);

        let observer = observe_phases(&sequencer);
        let mut rx = sequencer.subscribe();
        sequencer.start(RunRequest::all()).unwrap();
        collect(&mut rx).await;
        sequencer.wait().await;

        let seen = tap.seen.lock().clone();
        assert!(seen.contains(&("power off".to_string(), Postrun)));
        assert!(!tap.phases().contains(&Running));

        let observed = observer.await.unwrap();
        assert!(!observed.contains(&Running));
        assert_eq!(observed.last(), Some(&Idle));
    }

    #[tokio::test]
    async fn test_start_accepted_once_idle_is_published() {
        let rig = rig(TWO_TESTS);
        let mut phase = rig.sequencer.subscribe_phase();
        let mut rx = rig.sequencer.subscribe();

        rig.sequencer.start(RunRequest::all()).unwrap();
        assert_eq!(*phase.borrow_and_update(), RunPhase::Prerun);
        phase.wait_for(|p| *p == RunPhase::Idle).await.unwrap();

        // no wait() needed, Idle means a new run can start
        rig.sequencer.start(RunRequest::single(1)).unwrap();
        let events = collect(&mut rx).await;
        assert_eq!(events.last().unwrap().kind, ProgressKind::SuiteEnd);
        let second = collect(&mut rx).await;
        assert_eq!(second.last().unwrap().counters.success, 1);
    }

    #[tokio::test]
    async fn test_suite_repeat_replays_selection() {
        let rig = rig(TWO_TESTS);
        let mut rx = rig.sequencer.subscribe();
        rig.sequencer
            .start(RunRequest::all().with_suite_repeat(2))
            .unwrap();

        let events = collect(&mut rx).await;
        let started: Vec<_> = events
            .iter()
            .filter(|e| e.kind == ProgressKind::Started)
            .map(|e| (e.suite_repeat_idx, e.test_id.as_str()))
            .collect();
        assert_eq!(started, vec![(0, "T1"), (0, "T2"), (1, "T1"), (1, "T2")]);
        assert_eq!(events.last().unwrap().counters.success, 4);
        assert_eq!(events.last().unwrap().suite_repeat_total, 2);
    }

    #[tokio::test]
    async fn test_unmet_precondition_fails_without_steps() {
        use ProgressKind::*;

        let rig = rig(
            "tests:\n  - id: T1\n    requires: [capture]\n    commands: [power on]\n    teardown: [power off]\n",
        );
        rig.capture.set_status(CaptureStatus::Listening);

        let mut rx = rig.sequencer.subscribe();
        rig.sequencer.start(RunRequest::all()).unwrap();

        let events = collect(&mut rx).await;
        assert_eq!(kinds(&events), vec![Started, EndFailed, SuiteEnd]);
        assert!(events[1].text.contains("capture"));
        assert_eq!(events[2].counters.failed_commands, 1);
        assert_eq!(events[2].counters.failed, 1);

        // teardown still runs, the command itself never does
        let sent = rig.transport.sent();
        assert!(sent.contains(&"power off".to_string()));
        assert!(!sent.contains(&"power on".to_string()));
    }

    #[tokio::test]
    async fn test_run_lifecycle_directives() {
        let rig = rig("tests:\n  - id: T1\n    commands: [wait 1, marker boot, power on]\n");
        let mut rx = rig.sequencer.subscribe();
        let ticket = rig.sequencer.start(RunRequest::all()).unwrap();
        collect(&mut rx).await;
        rig.sequencer.wait().await;

        let sent = rig.transport.sent();
        assert_eq!(sent[0], Directive::NewFile(ticket.capture_file.clone()).to_string());
        assert_eq!(sent[1], "connectAllEcu");
        assert_eq!(sent[2], "marker");
        assert_eq!(sent[3], "power on");
        assert_eq!(&sent[4..], ["disconnectAllEcu", "clearFile"]);

        let labels = rig.capture.labels();
        assert_eq!(labels.first().unwrap(), "Tests start");
        assert!(labels.contains(&"marker".to_string()));
        assert_eq!(labels.last().unwrap(), "Tests end");
        assert!(ticket
            .capture_file
            .to_string_lossy()
            .ends_with("_suite_Logs.dlt"));
    }

    #[tokio::test]
    async fn test_control_errors() {
        let rig = rig_with(
            TWO_TESTS,
            ScriptedTransport::connected().with_delay(Duration::from_millis(20)),
        );

        assert!(matches!(
            rig.sequencer.stop(),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            rig.sequencer.start(RunRequest::single(7)),
            Err(Error::EmptySelection)
        ));
        assert!(matches!(
            rig.sequencer.start(RunRequest::all().with_test_repeat(0)),
            Err(Error::InvalidRequest(_))
        ));

        rig.sequencer.start(RunRequest::all()).unwrap();
        assert!(matches!(
            rig.sequencer.start(RunRequest::all()),
            Err(Error::InvalidState { .. })
        ));

        rig.sequencer.stop().unwrap();
        rig.sequencer.wait().await;
        assert_eq!(rig.sequencer.phase(), RunPhase::Idle);

        // idle again, a new run may start
        let mut rx = rig.sequencer.subscribe();
        rig.sequencer.start(RunRequest::single(1)).unwrap();
        let events = collect(&mut rx).await;
        assert_eq!(events.last().unwrap().kind, ProgressKind::SuiteEnd);
        assert_eq!(events.last().unwrap().counters.success, 1);
    }

    #[tokio::test]
    async fn test_empty_store_has_nothing_to_run() {
        let sequencer = Sequencer::new(
            Arc::new(TestStore::new()),
            Arc::new(ScriptedTransport::connected()),
            Arc::new(RecordingCapture::new()),
            SequencerOptions::default(),
        );
        assert!(matches!(
            sequencer.start(RunRequest::all()),
            Err(Error::EmptySelection)
        ));
        assert!(!sequencer.is_running());
    }

    #[tokio::test]
    async fn test_reload_does_not_affect_active_run() {
        let rig = rig_with(
            TWO_TESTS,
            ScriptedTransport::connected().with_delay(Duration::from_millis(10)),
        );
        let mut rx = rig.sequencer.subscribe();
        let ticket = rig.sequencer.start(RunRequest::all()).unwrap();

        rig.sequencer
            .store()
            .load_str("tests:\n  - id: X\n    commands: [noop]\n", None);

        let events = collect(&mut rx).await;
        assert_eq!(ticket.suite.len(), 2);
        assert_eq!(events.last().unwrap().counters.success, 2);
        assert!(events.iter().all(|e| e.test_id != "X"));
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let rig = rig(TWO_TESTS);
        let mut a = rig.sequencer.subscribe();
        let mut b = rig.sequencer.subscribe();
        rig.sequencer.start(RunRequest::all()).unwrap();

        let from_a = collect(&mut a).await;
        let from_b = collect(&mut b).await;
        assert_eq!(from_a, from_b);
    }
}
