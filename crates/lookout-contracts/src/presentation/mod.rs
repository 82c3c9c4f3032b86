mod reveal;
mod state;

pub use reveal::{LineState, RevealCursor, RevealError, RevealStep};
pub use state::{
    AnalysisMode, Completion, Phase, PresentationState, Slot, Submission, SubmissionToken,
    TransitionError,
};
