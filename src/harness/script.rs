//! Combined per-test script: main code and test code in one fresh namespace.

use std::sync::OnceLock;

use regex::Regex;

use crate::protocol::{fill_template, py_literal, TEST_MARKERS};

/// `__name__` of the namespace tests run in, so `if __name__ == "__main__":` blocks stay dormant.
pub const TEST_NAMESPACE: &str = "__pyrunner_test__";

const TEMPLATE: &str = include_str!("runner.py");

fn test_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^def\s+(test_\w+)\s*\(").unwrap())
}

/// First top-level `def test_*` in `source`.
pub fn test_function_name(source: &str) -> Option<String> {
    test_fn_re()
        .captures(source)
        .map(|caps| caps[1].to_string())
}

/// Build the script running `function` from `test_source` against `main_code`.
///
/// `name` is echoed back in the result payload and checked by the harness.
pub fn build(name: &str, function: Option<&str>, main_code: &str, test_source: &str) -> String {
    let function = function.map_or_else(|| "None".to_string(), py_literal);
    fill_template(
        TEMPLATE,
        &[
            ("NAME", py_literal(name)),
            ("FUNCTION", function),
            ("MAIN", py_literal(main_code)),
            ("TEST", py_literal(test_source)),
            ("START_MARKER", py_literal(TEST_MARKERS.start)),
            ("END_MARKER", py_literal(TEST_MARKERS.end)),
        ],
    )
}
