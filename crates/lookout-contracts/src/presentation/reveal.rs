use std::cmp::Ordering;

/// Sequential reveal of result lines.
///
/// `position` is the index of the line animating now. It only moves forward,
/// one step per completion signal, so line `n + 1` never starts before line
/// `n` is done. For `N` lines it visits `0..N-1`; completing the last line
/// sets `finished` and leaves `position` at `N - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealCursor {
    position: usize,
    total: usize,
    finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealStep {
    /// The given line is now animating.
    Next(usize),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Revealed,
    Animating,
    /// Rendered as an empty placeholder until unlocked.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RevealError {
    #[error("line {got} reported completion but line {expected} is the one animating")]
    OutOfOrder { expected: usize, got: usize },
    #[error("line {got} reported completion after the reveal finished")]
    AlreadyFinished { got: usize },
}

impl RevealCursor {
    pub fn new(total: usize) -> Self {
        Self {
            position: 0,
            total,
            finished: total == 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn active_line(&self) -> Option<usize> {
        (!self.finished).then_some(self.position)
    }

    pub fn line_state(&self, line: usize) -> LineState {
        if self.finished {
            return if line < self.total {
                LineState::Revealed
            } else {
                LineState::Pending
            };
        }
        match line.cmp(&self.position) {
            Ordering::Less => LineState::Revealed,
            Ordering::Equal => LineState::Animating,
            Ordering::Greater => LineState::Pending,
        }
    }

    /// Completion signal for `line`. Only the active line may complete.
    pub fn complete(&mut self, line: usize) -> Result<RevealStep, RevealError> {
        let Some(active) = self.active_line() else {
            return Err(RevealError::AlreadyFinished { got: line });
        };
        if line != active {
            return Err(RevealError::OutOfOrder {
                expected: active,
                got: line,
            });
        }
        if self.position + 1 < self.total {
            self.position += 1;
            Ok(RevealStep::Next(self.position))
        } else {
            self.finished = true;
            Ok(RevealStep::Finished)
        }
    }
}
