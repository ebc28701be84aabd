//! Marker-delimited JSON payloads inside captured program output.
//!
//! A payload is one JSON document on the lines between a start and an end
//! marker line. Everything else in the stream is ordinary program output.
//! Each consumer owns a distinct pair of markers, so payloads of different
//! consumers never collide even when captured together.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::de::DeserializeOwned;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Markers {
    /// Consumer name, used in diagnostics.
    pub consumer: &'static str,
    pub start: &'static str,
    pub end: &'static str,
}

pub const TRACE_MARKERS: Markers = Markers {
    consumer: "trace",
    start: "__PYRUNNER_TRACE_BEGIN__",
    end: "__PYRUNNER_TRACE_END__",
};

pub const TEST_MARKERS: Markers = Markers {
    consumer: "test result",
    start: "__PYRUNNER_TEST_BEGIN__",
    end: "__PYRUNNER_TEST_END__",
};

impl Markers {
    /// Wrap `payload` the way the generated scripts print it.
    pub fn wrap(&self, payload: &str) -> String {
        format!("{}\n{}\n{}\n", self.start, payload, self.end)
    }

    /// Decode the payload delimited by these markers in `output`.
    ///
    /// Marker lines must match exactly. When several candidate blocks exist
    /// the last one holding valid JSON wins, since generated scripts print
    /// their payload after all user output.
    pub fn decode<T: DeserializeOwned>(&self, output: &str) -> Result<T, ProtocolError> {
        let lines: Vec<&str> = output.lines().collect();
        let starts: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.trim_end_matches('\r') == self.start)
            .map(|(i, _)| i)
            .collect();

        let mut parse_error = None;
        for &start in starts.iter().rev() {
            let Some(len) = lines[start + 1..]
                .iter()
                .position(|l| l.trim_end_matches('\r') == self.end)
            else {
                continue;
            };
            let body = lines[start + 1..start + 1 + len].join("\n");
            match serde_json::from_str::<T>(&body) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    parse_error.get_or_insert(e.to_string());
                }
            }
        }

        Err(match parse_error {
            Some(message) => ProtocolError::InvalidJson {
                consumer: self.consumer,
                message,
            },
            None => ProtocolError::MissingMarkers {
                consumer: self.consumer,
            },
        })
    }
}

/// Python string literal for `text`. JSON string syntax is a subset of Python's.
pub fn py_literal(text: &str) -> String {
    serde_json::Value::String(text.to_owned()).to_string()
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"__([A-Z][A-Z_]*[A-Z])__").unwrap())
}

/// Fill the `__UPPER_CASE__` placeholders of a generated-script template in a
/// single pass, so substituted text is never scanned again. Unknown
/// placeholders are left as they are.
pub fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.clone())
        })
        .into_owned()
}
