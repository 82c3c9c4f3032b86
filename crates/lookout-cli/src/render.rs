use std::io::Write;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use lookout_contracts::analysis::{AnalysisError, AnalysisResult};
use lookout_contracts::presentation::{AnalysisMode, LineState, Phase, PresentationState};
use serde_json::json;

pub const NO_DIFFERENCES_MESSAGE: &str = "No missing objects found. The images match.";
const NO_OBJECTS_MESSAGE: &str = "No objects found.";

/// Terminal output for results, errors and session chatter.
pub struct Renderer<W: Write> {
    out: W,
    reveal_delay: Duration,
    json: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, reveal_delay: Duration, json: bool) -> Self {
        Self {
            out,
            reveal_delay,
            json,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn line(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()?;
        Ok(())
    }

    pub fn prompt(&mut self, text: &str) -> Result<()> {
        write!(self.out, "{text}")?;
        self.out.flush()?;
        Ok(())
    }

    /// Renders whatever the state is showing. A single-image result is typed
    /// out one line at a time; each finished line is reported back to the
    /// state before the next one starts.
    pub fn outcome<H>(&mut self, state: &mut PresentationState<H>) -> Result<()> {
        match state.phase() {
            Phase::Result => {
                let Some(result) = state.results().cloned() else {
                    return Ok(());
                };
                if self.json {
                    return self.result_json(state.mode(), &result);
                }
                match state.mode() {
                    AnalysisMode::Single => self.reveal(state, &result),
                    AnalysisMode::Differential => self.differential(&result),
                }
            }
            Phase::Error => match state.error().cloned() {
                Some(error) => self.error(&error),
                None => Ok(()),
            },
            Phase::Idle | Phase::Ready | Phase::Submitting => Ok(()),
        }
    }

    /// `<operation> failed: [<category>] <message>`, or the same fields as JSON.
    pub fn error(&mut self, error: &AnalysisError) -> Result<()> {
        if self.json {
            let classified = error.classified();
            let rendered = serde_json::to_string_pretty(&json!({
                "error": {
                    "operation": error.operation,
                    "category": classified.category,
                    "message": classified.message,
                }
            }))?;
            return self.line(&rendered);
        }
        self.line(&error.to_string())
    }

    fn result_json(&mut self, mode: AnalysisMode, result: &AnalysisResult) -> Result<()> {
        let rendered = serde_json::to_string_pretty(&json!({
            "mode": mode,
            "items": result.items,
            "degraded": result.degraded,
        }))?;
        self.line(&rendered)
    }

    fn differential(&mut self, result: &AnalysisResult) -> Result<()> {
        if result.is_empty() {
            return self.line(NO_DIFFERENCES_MESSAGE);
        }
        self.line("Missing objects:")?;
        for item in &result.items {
            writeln!(self.out, "  - {item}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn reveal<H>(&mut self, state: &mut PresentationState<H>, result: &AnalysisResult) -> Result<()> {
        if result.is_empty() {
            return self.line(NO_OBJECTS_MESSAGE);
        }
        self.line("Objects found:")?;
        for (index, item) in result.items.iter().enumerate() {
            if state.line_state(index) != LineState::Animating {
                continue;
            }
            write!(self.out, "  {}. ", index + 1)?;
            for ch in item.chars() {
                write!(self.out, "{ch}")?;
                self.out.flush()?;
                if !self.reveal_delay.is_zero() {
                    thread::sleep(self.reveal_delay);
                }
            }
            writeln!(self.out)?;
            state
                .complete_reveal_line(index)
                .with_context(|| format!("reveal of line {index} out of sequence"))?;
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use lookout_contracts::analysis::{AnalysisError, AnalysisResult};
    use lookout_contracts::errors::{classify, RawFailure};
    use lookout_contracts::presentation::{AnalysisMode, PresentationState};
    use lookout_contracts::schema::SingleImageSchema;

    use super::{Renderer, NO_DIFFERENCES_MESSAGE};

    fn completed(
        mode: AnalysisMode,
        outcome: Result<AnalysisResult, AnalysisError>,
    ) -> Result<PresentationState<()>> {
        let mut state = PresentationState::new(mode);
        for slot in mode.required_slots() {
            state.fill_slot(*slot, ())?;
        }
        let submission = state.submit()?;
        state.complete(submission.token, outcome);
        Ok(state)
    }

    fn render(state: &mut PresentationState<()>, json: bool) -> Result<String> {
        let mut renderer = Renderer::new(Vec::new(), Duration::ZERO, json);
        renderer.outcome(state)?;
        Ok(String::from_utf8(renderer.into_inner())?)
    }

    fn items(names: &[&str]) -> AnalysisResult {
        AnalysisResult::new(names.iter().map(|name| name.to_string()).collect())
    }

    #[test]
    fn single_result_reveals_every_line_in_order() -> Result<()> {
        let mut state = completed(
            AnalysisMode::Single,
            Ok(items(&["Cat", "Laptop", "Coffee Mug"])),
        )?;
        let text = render(&mut state, false)?;
        assert_eq!(
            text,
            "Objects found:\n  1. Cat\n  2. Laptop\n  3. Coffee Mug\n"
        );
        assert_eq!(state.reveal().map(|cursor| cursor.is_finished()), Some(true));
        assert_eq!(state.reveal_cursor(), Some(2));
        Ok(())
    }

    #[test]
    fn placeholder_result_renders_like_any_result() -> Result<()> {
        let mut state = completed(
            AnalysisMode::Single,
            Ok(AnalysisResult::format_error::<SingleImageSchema>()),
        )?;
        let text = render(&mut state, false)?;
        assert!(text.contains("1. AI output format error for objects."));
        Ok(())
    }

    #[test]
    fn empty_comparison_prints_no_differences() -> Result<()> {
        let mut state = completed(AnalysisMode::Differential, Ok(items(&[])))?;
        assert_eq!(render(&mut state, false)?, format!("{NO_DIFFERENCES_MESSAGE}\n"));
        Ok(())
    }

    #[test]
    fn comparison_lists_all_lines_at_once() -> Result<()> {
        let mut state = completed(AnalysisMode::Differential, Ok(items(&["Chair", "Vase"])))?;
        assert_eq!(
            render(&mut state, false)?,
            "Missing objects:\n  - Chair\n  - Vase\n"
        );
        assert!(state.reveal_cursor().is_none());
        Ok(())
    }

    #[test]
    fn errors_render_operation_category_and_message() -> Result<()> {
        let error = AnalysisError::new(
            "analyze_single_image",
            classify(&RawFailure::transport("TypeError: fetch failed")),
        );
        let mut state = completed(AnalysisMode::Single, Err(error))?;
        let text = render(&mut state, false)?;
        assert!(text.starts_with("analyze_single_image failed: [network] TypeError: fetch failed."));

        let json_text = render(&mut state, true)?;
        let value: serde_json::Value = serde_json::from_str(&json_text)?;
        assert_eq!(value["error"]["operation"], "analyze_single_image");
        assert_eq!(value["error"]["category"], "network");
        Ok(())
    }

    #[test]
    fn json_output_skips_the_reveal() -> Result<()> {
        let mut state = completed(AnalysisMode::Single, Ok(items(&["Cat"])))?;
        let value: serde_json::Value = serde_json::from_str(&render(&mut state, true)?)?;
        assert_eq!(value["mode"], "single");
        assert_eq!(value["items"], serde_json::json!(["Cat"]));
        assert_eq!(value["degraded"], serde_json::Value::Null);
        assert_eq!(state.reveal_cursor(), Some(0));
        Ok(())
    }
}
