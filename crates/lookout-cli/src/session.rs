use std::io::{self, BufRead, ErrorKind, Write};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use log::{debug, warn};
use lookout_contracts::analysis::{AnalysisError, AnalysisResult};
use lookout_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use lookout_contracts::errors::{ClassifiedError, ErrorCategory};
use lookout_contracts::events::SESSION_TRANSITION;
use lookout_contracts::presentation::{
    AnalysisMode, Completion, Phase, PresentationState, Slot, SubmissionToken, TransitionError,
};
use lookout_engine::{AnalysisJob, ImageHandle, LookoutEngine};
use serde_json::json;

use crate::render::Renderer;

/// Everything the session loop reacts to arrives on one channel, so a
/// `/reset` typed while an analysis is running is handled immediately.
pub enum SessionEvent {
    Line(String),
    Eof,
    Completed {
        token: SubmissionToken,
        outcome: Result<AnalysisResult, AnalysisError>,
    },
}

enum WorkerCommand {
    Run {
        token: SubmissionToken,
        job: AnalysisJob,
    },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Interactive analysis session over one presentation state.
pub struct Session<W: Write> {
    engine: LookoutEngine,
    state: PresentationState<ImageHandle>,
    renderer: Renderer<W>,
    worker: mpsc::Sender<WorkerCommand>,
    worker_handle: Option<thread::JoinHandle<()>>,
    /// Jobs handed to the worker whose completion has not arrived yet. Unlike
    /// the state's in-flight token this survives `/reset`.
    jobs_running: usize,
    last_phase: Phase,
}

impl<W: Write> Session<W> {
    /// Starts the analysis worker; its completions are sent to `events`.
    pub fn new(
        engine: LookoutEngine,
        mode: AnalysisMode,
        renderer: Renderer<W>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = AnalysisWorker { events };
        let handle = thread::Builder::new()
            .name("lookout-analysis".to_string())
            .spawn(move || worker.run(rx))
            .context("analysis worker spawn failed")?;
        Ok(Self {
            engine,
            state: PresentationState::new(mode),
            renderer,
            worker: tx,
            worker_handle: Some(handle),
            jobs_running: 0,
            last_phase: Phase::Idle,
        })
    }

    pub fn state(&self) -> &PresentationState<ImageHandle> {
        &self.state
    }

    #[cfg(test)]
    pub fn engine(&self) -> &LookoutEngine {
        &self.engine
    }

    #[cfg(test)]
    pub fn into_output(mut self) -> W {
        self.shutdown();
        self.renderer.into_inner()
    }

    pub fn greet(&mut self) -> Result<()> {
        let model = self.engine.model().name.clone();
        self.renderer.line(&format!(
            "Lookout session ({} mode, model {model}). Type /help for commands.",
            self.state.mode()
        ))?;
        self.show_slots_hint()
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Result<Flow> {
        match event {
            SessionEvent::Line(text) => self.handle_line(&text),
            SessionEvent::Eof => Ok(Flow::Quit),
            SessionEvent::Completed { token, outcome } => {
                self.jobs_running = self.jobs_running.saturating_sub(1);
                self.handle_completion(token, outcome)?;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn handle_line(&mut self, text: &str) -> Result<Flow> {
        let intent = parse_intent(text);
        let flow = match intent.action.as_str() {
            "noop" => Flow::Continue,
            "quit" => Flow::Quit,
            "help" => {
                self.renderer.line("Commands:")?;
                for (command, about) in CHAT_HELP_COMMANDS {
                    self.renderer.line(&format!("  {command:<22} {about}"))?;
                }
                Flow::Continue
            }
            "fill_slot" => {
                let slot = intent.arg("slot").unwrap_or_default().parse::<Slot>();
                match slot {
                    Ok(slot) => self.fill(slot, &intent)?,
                    Err(message) => self.renderer.line(&message)?,
                }
                Flow::Continue
            }
            "add_image" => {
                let next = self
                    .state
                    .mode()
                    .required_slots()
                    .iter()
                    .copied()
                    .find(|slot| self.state.slot(*slot).is_none());
                match next {
                    Some(slot) => self.fill(slot, &intent)?,
                    None => self.renderer.line(
                        "All image slots are filled; use /remove or a slot command to replace one.",
                    )?,
                }
                Flow::Continue
            }
            "remove_image" => {
                let slot = intent.arg("slot").unwrap_or_default().parse::<Slot>();
                match slot {
                    Ok(slot) => match self.state.remove_slot(slot) {
                        Ok(Some(handle)) => {
                            release(handle);
                            self.renderer.line(&format!("Removed the {slot} image."))?;
                        }
                        Ok(None) => self.renderer.line(&format!("No {slot} image selected."))?,
                        Err(err) => self.refused(&err)?,
                    },
                    Err(message) => self.renderer.line(&message)?,
                }
                Flow::Continue
            }
            "analyze" => {
                self.analyze()?;
                Flow::Continue
            }
            "reset" => {
                let pending = self.state.in_flight().is_some();
                for handle in self.state.reset() {
                    release(handle);
                }
                if pending {
                    self.renderer
                        .line("Discarded the running analysis; its result will be ignored.")?;
                }
                self.show_slots_hint()?;
                Flow::Continue
            }
            "set_mode" => {
                match intent.arg("mode").unwrap_or_default().parse::<AnalysisMode>() {
                    Ok(mode) => match self.state.switch_mode(mode) {
                        Ok(released) => {
                            released.into_iter().for_each(release);
                            self.renderer.line(&format!("Mode set to {mode}."))?;
                            self.show_slots_hint()?;
                        }
                        Err(err) => self.refused(&err)?,
                    },
                    Err(message) => self.renderer.line(&message)?,
                }
                Flow::Continue
            }
            "set_model" => {
                let requested = intent.arg("model").unwrap_or_default().to_string();
                if requested.is_empty() {
                    let current = self.engine.model().name.clone();
                    self.renderer.line(&format!("Model: {current}"))?;
                } else {
                    let model = self.engine.set_model(&requested)?.name.clone();
                    if let Some(reason) = self.engine.fallback_reason().map(str::to_string) {
                        self.renderer.line(&reason)?;
                    }
                    self.renderer.line(&format!("Model set to {model}"))?;
                }
                Flow::Continue
            }
            "status" => {
                self.status()?;
                Flow::Continue
            }
            _ => {
                let command = intent.arg("command").unwrap_or_default().to_string();
                self.renderer
                    .line(&format!("Unknown command /{command}. Type /help."))?;
                Flow::Continue
            }
        };
        self.note_transition();
        Ok(flow)
    }

    pub fn handle_completion(
        &mut self,
        token: SubmissionToken,
        outcome: Result<AnalysisResult, AnalysisError>,
    ) -> Result<()> {
        match self.state.complete(token, outcome) {
            Completion::Applied(_) => {
                self.note_transition();
                self.renderer.outcome(&mut self.state)?;
                self.renderer.line("Type /another to analyze another image.")?;
            }
            Completion::Stale => {
                debug!("discarded stale completion for submission {}", token.value());
            }
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        let _ = self.worker.send(WorkerCommand::Stop);
        // A running call cannot be aborted, including one orphaned by /reset;
        // leave its thread behind.
        if !self.worker_busy() {
            if let Some(handle) = self.worker_handle.take() {
                let _ = handle.join();
            }
        }
        for handle in self.state.reset() {
            release(handle);
        }
    }

    fn worker_busy(&self) -> bool {
        self.jobs_running > 0
    }

    fn fill(&mut self, slot: Slot, intent: &Intent) -> Result<()> {
        let source = intent.arg("path").unwrap_or_default();
        if source.is_empty() {
            return self
                .renderer
                .line(&format!("/{slot} requires an image path or data URL"));
        }
        if !self.state.mode().has_slot(slot) {
            return self.refused(&TransitionError::SlotNotInMode {
                slot,
                mode: self.state.mode(),
            });
        }
        if !self.state.slots_editable() {
            let err = match self.state.phase() {
                Phase::Submitting => TransitionError::SlotsLocked,
                phase => TransitionError::InvalidPhase {
                    action: "change images",
                    phase,
                },
            };
            return self.refused(&err);
        }
        let handle = match self.engine.load_image(source) {
            Ok(handle) => handle,
            Err(err) => return self.renderer.line(&format!("Could not load image: {err}")),
        };
        let label = handle.describe();
        match self.state.fill_slot(slot, handle) {
            Ok(previous) => {
                if let Some(previous) = previous {
                    release(previous);
                }
                let what = match slot {
                    Slot::Image => "Image".to_string(),
                    other => format!("{} image", capitalize(other.as_str())),
                };
                self.renderer.line(&format!("{what} set ({label})."))?;
                if self.state.phase() == Phase::Ready {
                    self.renderer.line("Ready. Type /analyze to run.")?;
                }
                Ok(())
            }
            Err(err) => self.refused(&err),
        }
    }

    fn analyze(&mut self) -> Result<()> {
        let submission = match self.state.submit() {
            Ok(submission) => submission,
            Err(err) => return self.refused(&err),
        };
        self.note_transition();
        let token = submission.token;
        let operation = match submission.mode {
            AnalysisMode::Single => "analyze_single_image",
            AnalysisMode::Differential => "compare_images",
        };
        match self.engine.prepare(submission) {
            Ok(job) => {
                self.renderer.line("Analyzing…")?;
                if self.worker.send(WorkerCommand::Run { token, job }).is_ok() {
                    self.jobs_running += 1;
                } else {
                    let error = ClassifiedError::new(
                        ErrorCategory::Unknown,
                        "The analysis worker stopped unexpectedly",
                    );
                    self.handle_completion(token, Err(AnalysisError::new(operation, error)))?;
                }
            }
            Err(err) => {
                let error = ClassifiedError::new(ErrorCategory::Unknown, &format!("{err:#}"));
                self.handle_completion(token, Err(AnalysisError::new(operation, error)))?;
            }
        }
        Ok(())
    }

    fn status(&mut self) -> Result<()> {
        let mut lines = vec![
            format!("mode: {}", self.state.mode()),
            format!("phase: {}", self.state.phase()),
            format!("model: {}", self.engine.model().name),
        ];
        for slot in self.state.mode().required_slots() {
            let value = self
                .state
                .slot(*slot)
                .map(ImageHandle::describe)
                .unwrap_or_else(|| "(empty)".to_string());
            lines.push(format!("{slot}: {value}"));
        }
        if let Some(message) = self.state.validation_message() {
            lines.push(format!("note: {message}"));
        }
        for line in lines {
            self.renderer.line(&line)?;
        }
        Ok(())
    }

    fn show_slots_hint(&mut self) -> Result<()> {
        let hint = match self.state.mode() {
            AnalysisMode::Single => "Select an image with /image <path>.",
            AnalysisMode::Differential => {
                "Select images with /reference <path> and /comparison <path>."
            }
        };
        self.renderer.line(hint)
    }

    fn refused(&mut self, err: &TransitionError) -> Result<()> {
        self.renderer.line(&err.to_string())
    }

    fn note_transition(&mut self) {
        let before = self.last_phase;
        let after = self.state.phase();
        if before == after {
            return;
        }
        self.last_phase = after;
        debug!("session {before} -> {after}");
        let payload = json!({ "from": before, "to": after, "mode": self.state.mode() });
        if let Err(err) = self.engine.emit_event(
            SESSION_TRANSITION,
            payload.as_object().cloned().unwrap_or_default(),
        ) {
            warn!("event log write failed: {err:#}");
        }
    }
}

struct AnalysisWorker {
    events: mpsc::Sender<SessionEvent>,
}

impl AnalysisWorker {
    fn run(self, rx: mpsc::Receiver<WorkerCommand>) {
        while let Ok(command) = rx.recv() {
            match command {
                WorkerCommand::Run { token, job } => {
                    let outcome = job.run();
                    if self
                        .events
                        .send(SessionEvent::Completed { token, outcome })
                        .is_err()
                    {
                        break;
                    }
                }
                WorkerCommand::Stop => break,
            }
        }
    }
}

/// Runs the REPL on stdin/stdout until `/quit` or end of input.
pub fn run_session(
    engine: LookoutEngine,
    mode: AnalysisMode,
    renderer: Renderer<io::Stdout>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut session = Session::new(engine, mode, renderer, tx.clone())?;
    spawn_stdin_reader(tx)?;
    session.greet()?;

    loop {
        if session.state().phase() != Phase::Submitting {
            session.renderer.prompt("> ")?;
        }
        let Ok(event) = rx.recv() else {
            break;
        };
        if session.handle_event(event)? == Flow::Quit {
            break;
        }
    }
    session.shutdown();
    Ok(())
}

fn spawn_stdin_reader(tx: mpsc::Sender<SessionEvent>) -> Result<()> {
    thread::Builder::new()
        .name("lookout-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                let read = match stdin.lock().read_line(&mut line) {
                    Ok(read) => read,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!("stdin read failed: {err}");
                        0
                    }
                };
                if read == 0 {
                    let _ = tx.send(SessionEvent::Eof);
                    break;
                }
                let input = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(SessionEvent::Line(input)).is_err() {
                    break;
                }
            }
        })
        .context("stdin reader spawn failed")?;
    Ok(())
}

fn release(handle: ImageHandle) {
    let label = handle.describe();
    if let Err(err) = handle.release() {
        debug!("release of {label} skipped: {err}");
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
