//! Bounded, symbolized stack capture for events.

use serde::{Deserialize, Serialize};

/// Frames captured when no explicit bound is given.
pub const DEFAULT_MAX_FRAMES: usize = 32;

/// One resolved stack frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
    pub module: String,
}

/// Capture at most `max_frames` resolved frames at the call site.
///
/// Symbol resolution is best-effort: frames the platform cannot resolve are
/// recorded with empty fields rather than dropped, so the frame count still
/// reflects the true stack depth.
pub fn capture(max_frames: usize) -> Vec<StackFrame> {
    let mut frames = Vec::new();

    backtrace::trace(|frame| {
        let mut resolved = StackFrame::default();
        backtrace::resolve_frame(frame, |symbol| {
            if let Some(name) = symbol.name() {
                resolved.function = name.to_string();
                if let Some((module, _)) = resolved.function.rsplit_once("::") {
                    resolved.module = module.to_string();
                }
            }
            if let Some(file) = symbol.filename() {
                resolved.file = file.display().to_string();
            }
            if let Some(line) = symbol.lineno() {
                resolved.line = line;
            }
        });
        frames.push(resolved);
        frames.len() < max_frames
    });

    frames
}
