//! Test harness: a persisted collection of user tests run against main code.
//!
//! Every run of a test executes one combined script through the [`Invoker`].
//! The script builds a fresh namespace, runs the main code and the test source
//! into it, calls the test function and prints a marker-delimited result
//! payload. Tests run strictly one after another; each result is applied and
//! persisted before the next test starts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::execution::{ExecutionResult, Invoker};
use crate::protocol::TEST_MARKERS;

pub mod script;
pub mod store;

pub use store::{JsonFileStore, MemoryStore, TestStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Passed,
    Failed,
    Error,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTest {
    pub id: Uuid,
    pub display_name: String,
    /// First top-level `def test_*` of the source; the function the run calls.
    pub function_name: Option<String>,
    pub source: String,
    pub status: TestStatus,
    pub output: String,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl ActiveTest {
    pub fn new(display_name: String, function_name: Option<String>, source: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name,
            function_name,
            source,
            status: TestStatus::Pending,
            output: String::new(),
            last_run: None,
        }
    }

    /// Name the result payload must carry to belong to this test.
    pub fn identity(&self) -> &str {
        self.function_name.as_deref().unwrap_or(&self.display_name)
    }
}

/// Wire form of one test result.
#[derive(Debug, Deserialize)]
struct TestPayload {
    name: String,
    status: WireStatus,
    #[serde(default)]
    output: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum WireStatus {
    Passed,
    Failed,
    Error,
}

impl From<WireStatus> for TestStatus {
    fn from(s: WireStatus) -> Self {
        match s {
            WireStatus::Passed => TestStatus::Passed,
            WireStatus::Failed => TestStatus::Failed,
            WireStatus::Error => TestStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Error => self.errored += 1,
            TestStatus::Pending => {}
        }
    }
}

pub struct TestHarness<S: TestStore> {
    invoker: Invoker,
    store: S,
    owner: String,
    tests: Vec<ActiveTest>,
}

impl<S: TestStore> TestHarness<S> {
    /// Load `owner`'s saved tests from `store`.
    pub fn open(invoker: Invoker, store: S, owner: impl Into<String>) -> anyhow::Result<Self> {
        let owner = owner.into();
        let tests = store.load(&owner)?;
        debug!(owner = %owner, count = tests.len(), "loaded tests");
        Ok(Self {
            invoker,
            store,
            owner,
            tests,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn tests(&self) -> &[ActiveTest] {
        &self.tests
    }

    pub fn get(&self, id: Uuid) -> Option<&ActiveTest> {
        self.tests.iter().find(|t| t.id == id)
    }

    /// Add a pending test. Without an explicit name it is named after its
    /// first `def test_*`, or `Test N` when there is none.
    pub fn add(&mut self, source: impl Into<String>, display_name: Option<&str>) -> &ActiveTest {
        let source = source.into();
        let function_name = script::test_function_name(&source);
        let display_name = display_name
            .map(str::to_string)
            .or_else(|| function_name.clone())
            .unwrap_or_else(|| format!("Test {}", self.tests.len() + 1));

        let idx = self.tests.len();
        self.tests.push(ActiveTest::new(display_name, function_name, source));
        self.persist();
        &self.tests[idx]
    }

    pub fn remove(&mut self, id: Uuid) -> Option<ActiveTest> {
        let idx = self.tests.iter().position(|t| t.id == id)?;
        let removed = self.tests.remove(idx);
        self.persist();
        Some(removed)
    }

    /// Run every test against `main_code`, in order.
    pub async fn run_all(&mut self, main_code: &str) -> RunSummary {
        let mut summary = RunSummary::default();
        for idx in 0..self.tests.len() {
            let status = self.run_at(idx, main_code).await;
            summary.record(status);
        }
        info!(
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            "test run finished"
        );
        summary
    }

    /// Rerun one test. `None` if no test has that id.
    pub async fn run_test(&mut self, id: Uuid, main_code: &str) -> Option<&ActiveTest> {
        let idx = self.tests.iter().position(|t| t.id == id)?;
        self.run_at(idx, main_code).await;
        Some(&self.tests[idx])
    }

    async fn run_at(&mut self, idx: usize, main_code: &str) -> TestStatus {
        let test = &self.tests[idx];
        let combined = script::build(
            test.identity(),
            test.function_name.as_deref(),
            main_code,
            &test.source,
        );
        let result = self.invoker.invoke(&combined, None).await;
        let (status, output) = classify(&self.tests[idx], result);

        let test = &mut self.tests[idx];
        debug!(test = %test.display_name, %status, "test finished");
        test.status = status;
        test.output = output;
        test.last_run = Some(Utc::now());
        self.persist();
        status
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.owner, &self.tests) {
            warn!("failed to save tests for {}: {:#}", self.owner, e);
        }
    }
}

/// Status and output of `test` from the result of its combined script.
fn classify(test: &ActiveTest, result: ExecutionResult) -> (TestStatus, String) {
    if let Some(err) = result.error {
        return (TestStatus::Error, err.to_string());
    }
    match decode(test, &result.stdout) {
        Ok(payload) => (payload.status.into(), payload.output),
        Err(e) => (TestStatus::Error, format!("Test harness error: {}", e)),
    }
}

fn decode(test: &ActiveTest, stdout: &str) -> Result<TestPayload, ProtocolError> {
    let payload: TestPayload = TEST_MARKERS.decode(stdout)?;
    if payload.name != test.identity() {
        return Err(ProtocolError::IdentityMismatch {
            consumer: TEST_MARKERS.consumer,
            expected: test.identity().to_string(),
            found: payload.name,
        });
    }
    Ok(payload)
}
