//! Deferred test assertions evaluated against elapsed session time.

use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{debug, error};

use crate::models::TestOutcome;

/// Assertion closure. Runs on the frame thread while the recorder is locked,
/// so it must be cheap, free of side effects, and must not call back into the
/// recorder.
pub type Predicate = Box<dyn Fn() -> bool + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestTrigger {
    /// Seconds after session start.
    After(f64),
    /// Evaluated when the session stops.
    EndOfSession,
}

impl TestTrigger {
    /// Sort key; end-of-session cases sort last.
    pub fn seconds(&self) -> f64 {
        match self {
            TestTrigger::After(seconds) if seconds.is_nan() => f64::INFINITY,
            TestTrigger::After(seconds) => *seconds,
            TestTrigger::EndOfSession => f64::INFINITY,
        }
    }

    fn as_outcome_time(&self) -> Option<f64> {
        match self {
            TestTrigger::After(seconds) if seconds.is_finite() => Some(*seconds),
            _ => None,
        }
    }
}

pub struct ArTestCase {
    description: String,
    trigger: TestTrigger,
    predicate: Predicate,
    executed: bool,
    passed: bool,
}

impl ArTestCase {
    pub fn new(description: impl Into<String>, trigger: TestTrigger, predicate: Predicate) -> Self {
        Self {
            description: description.into(),
            trigger,
            predicate,
            executed: false,
            passed: false,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn trigger(&self) -> TestTrigger {
        self.trigger
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    fn is_due(&self, elapsed: f64) -> bool {
        elapsed >= self.trigger.seconds()
    }

    fn execute(&mut self) -> TestResult {
        let passed = match catch_unwind(AssertUnwindSafe(|| (self.predicate)())) {
            Ok(passed) => passed,
            Err(_) => {
                error!("test '{}' panicked; recording it as failed", self.description);
                false
            }
        };
        self.executed = true;
        self.passed = passed;
        debug!(
            "test '{}' evaluated: {}",
            self.description,
            if passed { "passed" } else { "failed" }
        );
        TestResult {
            description: self.description.clone(),
            trigger: self.trigger,
            passed,
        }
    }

    pub fn outcome(&self) -> TestOutcome {
        TestOutcome {
            description: self.description.clone(),
            trigger_time: self.trigger.as_outcome_time(),
            executed: self.executed,
            passed: self.passed,
        }
    }
}

impl std::fmt::Debug for ArTestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArTestCase")
            .field("description", &self.description)
            .field("trigger", &self.trigger)
            .field("executed", &self.executed)
            .field("passed", &self.passed)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub description: String,
    pub trigger: TestTrigger,
    pub passed: bool,
}

/// Test cases kept sorted by ascending trigger time.
#[derive(Debug, Default)]
pub struct TestQueue {
    cases: Vec<ArTestCase>,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts after any case with the same trigger time, so equal triggers
    /// keep registration order.
    pub fn register(&mut self, case: ArTestCase) {
        let key = case.trigger.seconds();
        let index = self
            .cases
            .partition_point(|existing| existing.trigger.seconds() <= key);
        self.cases.insert(index, case);
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.cases.iter().filter(|case| !case.executed).count()
    }

    pub fn cases(&self) -> &[ArTestCase] {
        &self.cases
    }

    /// Evaluates every pending case whose trigger time has passed. Stops at the
    /// first pending case that is not due yet.
    pub fn evaluate_due(&mut self, elapsed: f64) -> Vec<TestResult> {
        let mut results = Vec::new();
        for case in self.cases.iter_mut() {
            if case.executed {
                continue;
            }
            if !case.is_due(elapsed) {
                break;
            }
            results.push(case.execute());
        }
        results
    }

    /// Forces every still-pending case, end-of-session ones included.
    pub fn evaluate_remaining(&mut self) -> Vec<TestResult> {
        self.cases
            .iter_mut()
            .filter(|case| !case.executed)
            .map(ArTestCase::execute)
            .collect()
    }

    pub fn outcomes(&self) -> Vec<TestOutcome> {
        self.cases.iter().map(ArTestCase::outcome).collect()
    }
}
