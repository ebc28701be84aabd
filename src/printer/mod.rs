//! Terminal rendering of results, traces and tests.

use std::fmt::Write as _;

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::execution::ExecutionResult;
use crate::harness::{ActiveTest, RunSummary, TestStatus};
use crate::tracer::Trace;

#[derive(Debug, Clone, Copy)]
pub struct TextPrinter {
    pub color: bool,
}

impl Default for TextPrinter {
    fn default() -> Self {
        Self {
            color: std::io::stdout().is_terminal(),
        }
    }
}

impl TextPrinter {
    fn paint(&self, text: &str, color: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        match color {
            "green" => text.green().to_string(),
            "red" => text.red().to_string(),
            "yellow" => text.yellow().to_string(),
            "cyan" => text.cyan().to_string(),
            "dim" => text.dimmed().to_string(),
            _ => text.to_string(),
        }
    }

    fn status(&self, status: TestStatus) -> String {
        let label = status.as_str().to_ascii_uppercase();
        match status {
            TestStatus::Passed => self.paint(&label, "green"),
            TestStatus::Failed => self.paint(&label, "red"),
            TestStatus::Error => self.paint(&label, "yellow"),
            TestStatus::Pending => self.paint(&label, "dim"),
        }
    }

    /// Program stdout as-is, stderr and any error after it.
    pub fn render_result(&self, result: &ExecutionResult) -> String {
        let mut out = result.stdout.clone();
        if !result.stderr.is_empty() {
            out.push_str(&self.paint(&result.stderr, "yellow"));
        }
        if let Some(value) = &result.return_value {
            let _ = writeln!(out, "{}", self.paint(&format!("=> {}", value), "cyan"));
        }
        if let Some(err) = &result.error {
            if !err.raw_trace.is_empty() {
                out.push_str(&self.paint(&err.raw_trace, "dim"));
            }
            let _ = writeln!(out, "{}", self.paint(&err.to_string(), "red"));
        }
        out
    }

    pub fn render_trace(&self, trace: &Trace) -> String {
        let mut out = String::new();
        for step in &trace.steps {
            let line = if step.is_program_end() {
                "end".to_string()
            } else {
                format!("L{}", step.line)
            };
            let vars = step
                .variables
                .iter()
                .map(|(name, value)| {
                    let pair = format!("{}={}", name, value);
                    if step.changed.contains(name) {
                        self.paint(&pair, "green")
                    } else {
                        pair
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(
                out,
                "{:>4} {:<5} {}{}",
                step.index,
                self.paint(&line, "cyan"),
                "  ".repeat(step.call_depth as usize),
                vars
            );
        }
        if trace.truncated {
            let _ = writeln!(out, "{}", self.paint("(trace truncated)", "yellow"));
        }
        if !trace.combined_output.is_empty() {
            let _ = writeln!(out, "--- output ---");
            out.push_str(&trace.combined_output);
        }
        if let Some(error) = &trace.error {
            let _ = writeln!(out, "{}", self.paint(error, "red"));
        }
        out
    }

    pub fn render_tests(&self, tests: &[ActiveTest]) -> String {
        let mut out = String::new();
        for t in tests {
            let _ = writeln!(out, "{}  {:<8} {}", t.id, self.status(t.status), t.display_name);
        }
        out
    }

    /// One test's outcome, with its output indented below unless it passed.
    pub fn render_test(&self, test: &ActiveTest) -> String {
        let mut out = format!("{} {}\n", self.status(test.status), test.display_name);
        if test.status != TestStatus::Passed {
            for line in test.output.lines() {
                let _ = writeln!(out, "    {}", line);
            }
        }
        out
    }

    pub fn render_summary(&self, summary: &RunSummary) -> String {
        let text = format!(
            "{} passed, {} failed, {} errors",
            summary.passed, summary.failed, summary.errored
        );
        let color = if summary.all_passed() { "green" } else { "red" };
        format!("{}\n", self.paint(&text, color))
    }

    pub fn print(&self, text: &str) {
        print!("{}", text);
    }
}
