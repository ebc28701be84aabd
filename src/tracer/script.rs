//! Instrumented wrapper script for the tracer.

use crate::protocol::{fill_template, py_literal, TRACE_MARKERS};

/// Filename user code is compiled under; the trace hook only follows frames from it.
pub const SYNTHETIC_FILENAME: &str = "<student_code>";

/// Line number of the terminal step.
pub const PROGRAM_END: u32 = 0;

const TEMPLATE: &str = include_str!("tracer.py");

/// Build the script that traces `source`, recording at most `max_steps` line steps.
pub fn build(source: &str, max_steps: usize) -> String {
    fill_template(
        TEMPLATE,
        &[
            ("SOURCE", py_literal(source)),
            ("MAX_STEPS", max_steps.to_string()),
            ("START_MARKER", py_literal(TRACE_MARKERS.start)),
            ("END_MARKER", py_literal(TRACE_MARKERS.end)),
        ],
    )
}
