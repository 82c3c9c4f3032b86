use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::reveal::{LineState, RevealCursor, RevealError, RevealStep};
use crate::analysis::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// One image, list what is in it.
    Single,
    /// Reference + comparison, list what went missing.
    Differential,
}

impl AnalysisMode {
    pub fn required_slots(self) -> &'static [Slot] {
        match self {
            Self::Single => &[Slot::Image],
            Self::Differential => &[Slot::Reference, Slot::Comparison],
        }
    }

    pub fn has_slot(self, slot: Slot) -> bool {
        self.required_slots().contains(&slot)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Differential => "compare",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "single" | "objects" => Ok(Self::Single),
            "compare" | "differential" | "diff" => Ok(Self::Differential),
            other => Err(format!("unknown mode '{other}' (expected single or compare)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Image,
    Reference,
    Comparison,
}

impl Slot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Reference => "reference",
            Self::Comparison => "comparison",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "reference" | "ref" => Ok(Self::Reference),
            "comparison" | "cmp" => Ok(Self::Comparison),
            other => Err(format!(
                "unknown slot '{other}' (expected image, reference or comparison)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Ready,
    Submitting,
    Result,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Submitting => "submitting",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one submission. A completion carrying any other token is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionToken(u64);

impl SubmissionToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Everything the worker needs for one analysis. The slot handles move into
/// the submission; the state keeps none while `submitting`.
#[derive(Debug)]
pub struct Submission<H> {
    pub token: SubmissionToken,
    pub mode: AnalysisMode,
    pub images: Vec<(Slot, H)>,
}

impl<H> Submission<H> {
    pub fn take(&mut self, slot: Slot) -> Option<H> {
        let idx = self.images.iter().position(|(held, _)| *held == slot)?;
        Some(self.images.remove(idx).1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied(Phase),
    /// Reset happened (or another submission started) after this one began.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("image slots cannot change while an analysis is running")]
    SlotsLocked,
    #[error("slot '{slot}' is not used in {mode} mode")]
    SlotNotInMode { slot: Slot, mode: AnalysisMode },
    #[error("{message}")]
    MissingImages { missing: Vec<Slot>, message: String },
    #[error("an analysis is already running")]
    AlreadySubmitting,
    #[error("cannot {action} while {phase}; reset first")]
    InvalidPhase { action: &'static str, phase: Phase },
    #[error("no result is being revealed")]
    RevealInactive,
    #[error(transparent)]
    Reveal(#[from] RevealError),
}

/// Client-side lifecycle: idle → ready → submitting → result | error → idle.
///
/// Pure transitions only. Handles of type `H` are owned here while they sit
/// in a slot and handed back to the caller whenever they leave one (replace,
/// remove, reset, mode switch) so the caller can release them.
#[derive(Debug)]
pub struct PresentationState<H> {
    mode: AnalysisMode,
    phase: Phase,
    slots: BTreeMap<Slot, H>,
    results: Option<AnalysisResult>,
    error: Option<AnalysisError>,
    reveal: Option<RevealCursor>,
    validation_message: Option<String>,
    in_flight: Option<SubmissionToken>,
    next_token: u64,
}

impl<H> PresentationState<H> {
    pub fn new(mode: AnalysisMode) -> Self {
        Self {
            mode,
            phase: Phase::Idle,
            slots: BTreeMap::new(),
            results: None,
            error: None,
            reveal: None,
            validation_message: None,
            in_flight: None,
            next_token: 1,
        }
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn results(&self) -> Option<&AnalysisResult> {
        self.results.as_ref()
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        self.error.as_ref()
    }

    pub fn reveal_cursor(&self) -> Option<usize> {
        self.reveal.map(|cursor| cursor.position())
    }

    pub fn reveal(&self) -> Option<&RevealCursor> {
        self.reveal.as_ref()
    }

    pub fn validation_message(&self) -> Option<&str> {
        self.validation_message.as_deref()
    }

    pub fn slot(&self, slot: Slot) -> Option<&H> {
        self.slots.get(&slot)
    }

    /// UI controls that change slots must be disabled when this is false.
    pub fn slots_editable(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Ready)
    }

    pub fn in_flight(&self) -> Option<SubmissionToken> {
        self.in_flight
    }

    /// Puts `handle` into `slot`, returning whatever it replaced.
    pub fn fill_slot(&mut self, slot: Slot, handle: H) -> Result<Option<H>, TransitionError> {
        self.ensure_slot_mutation(slot, "change images")?;
        let previous = self.slots.insert(slot, handle);
        self.validation_message = None;
        self.sync_readiness();
        Ok(previous)
    }

    pub fn remove_slot(&mut self, slot: Slot) -> Result<Option<H>, TransitionError> {
        self.ensure_slot_mutation(slot, "remove images")?;
        let removed = self.slots.remove(&slot);
        self.sync_readiness();
        Ok(removed)
    }

    /// The user-triggered analyze action. Refused, with a validation message
    /// and no state change otherwise, unless every required slot is filled.
    pub fn submit(&mut self) -> Result<Submission<H>, TransitionError> {
        match self.phase {
            Phase::Idle | Phase::Ready => {}
            Phase::Submitting => return Err(TransitionError::AlreadySubmitting),
            phase => {
                return Err(TransitionError::InvalidPhase {
                    action: "analyze",
                    phase,
                })
            }
        }

        let missing: Vec<Slot> = self
            .mode
            .required_slots()
            .iter()
            .copied()
            .filter(|slot| !self.slots.contains_key(slot))
            .collect();
        if !missing.is_empty() {
            let message = missing_images_message(self.mode, &missing);
            self.validation_message = Some(message.clone());
            return Err(TransitionError::MissingImages { missing, message });
        }

        let token = SubmissionToken(self.next_token);
        self.next_token += 1;
        let mut images = Vec::with_capacity(self.mode.required_slots().len());
        for slot in self.mode.required_slots() {
            if let Some(handle) = self.slots.remove(slot) {
                images.push((*slot, handle));
            }
        }

        self.phase = Phase::Submitting;
        self.in_flight = Some(token);
        self.validation_message = None;
        Ok(Submission {
            token,
            mode: self.mode,
            images,
        })
    }

    /// Applies the outcome of submission `token`, unless it is stale.
    pub fn complete(
        &mut self,
        token: SubmissionToken,
        outcome: Result<AnalysisResult, AnalysisError>,
    ) -> Completion {
        if self.phase != Phase::Submitting || self.in_flight != Some(token) {
            return Completion::Stale;
        }
        self.in_flight = None;
        match outcome {
            Ok(result) => {
                self.reveal = match self.mode {
                    AnalysisMode::Single => Some(RevealCursor::new(result.len())),
                    AnalysisMode::Differential => None,
                };
                self.results = Some(result);
                self.error = None;
                self.phase = Phase::Result;
            }
            Err(err) => {
                self.results = None;
                self.reveal = None;
                self.error = Some(err);
                self.phase = Phase::Error;
            }
        }
        Completion::Applied(self.phase)
    }

    /// Animation-completion signal for result line `line`.
    pub fn complete_reveal_line(&mut self, line: usize) -> Result<RevealStep, TransitionError> {
        if self.phase != Phase::Result {
            return Err(TransitionError::RevealInactive);
        }
        let cursor = self.reveal.as_mut().ok_or(TransitionError::RevealInactive)?;
        Ok(cursor.complete(line)?)
    }

    pub fn line_state(&self, line: usize) -> LineState {
        match self.reveal.as_ref() {
            Some(cursor) => cursor.line_state(line),
            None => LineState::Revealed,
        }
    }

    /// "Analyze another": back to idle from any phase. An in-flight
    /// submission is orphaned; its completion will be reported stale.
    /// Returns every handle still held so the caller can release it.
    pub fn reset(&mut self) -> Vec<H> {
        let released = std::mem::take(&mut self.slots).into_values().collect();
        self.phase = Phase::Idle;
        self.results = None;
        self.error = None;
        self.reveal = None;
        self.validation_message = None;
        self.in_flight = None;
        released
    }

    pub fn switch_mode(&mut self, mode: AnalysisMode) -> Result<Vec<H>, TransitionError> {
        if self.phase == Phase::Submitting {
            return Err(TransitionError::SlotsLocked);
        }
        let released = self.reset();
        self.mode = mode;
        Ok(released)
    }

    fn ensure_slot_mutation(&self, slot: Slot, action: &'static str) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Idle | Phase::Ready => {}
            Phase::Submitting => return Err(TransitionError::SlotsLocked),
            phase => return Err(TransitionError::InvalidPhase { action, phase }),
        }
        if !self.mode.has_slot(slot) {
            return Err(TransitionError::SlotNotInMode {
                slot,
                mode: self.mode,
            });
        }
        Ok(())
    }

    fn sync_readiness(&mut self) {
        let complete = self
            .mode
            .required_slots()
            .iter()
            .all(|slot| self.slots.contains_key(slot));
        self.phase = if complete { Phase::Ready } else { Phase::Idle };
    }
}

fn missing_images_message(mode: AnalysisMode, missing: &[Slot]) -> String {
    match mode {
        AnalysisMode::Single => "Please select an image to analyze first.".to_string(),
        AnalysisMode::Differential if missing.len() > 1 => {
            "Please provide both a reference image and a comparison image.".to_string()
        }
        AnalysisMode::Differential => {
            let slot = missing.first().copied().unwrap_or(Slot::Reference);
            format!("Please provide a {slot} image.")
        }
    }
}
