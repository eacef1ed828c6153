// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub use anyhow::{Context, Result};
pub use inventory::submit as inventory_submit;
pub use underlay_framework;
pub use underlay_testcase_macros::*;
use thiserror::Error;

pub use underlay_framework::Framework;
pub use underlay_framework::FrameworkParameters;

#[derive(Debug, Error)]
pub enum TestSkippedError {
    #[error("Test skipped: {0:?}")]
    TestSkipped(Option<String>),
}

/// Ends the current test case early and reports it as skipped.
#[macro_export]
macro_rules! underlay_skip {
    () => {
        return Err($crate::TestSkippedError::TestSkipped(None).into())
    };
    ($msg:expr) => {
        return Err($crate::TestSkippedError::TestSkipped(Some(
            $msg.to_string(),
        ))
        .into())
    };
}

/// The outcome from executing a specific test case.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TestOutcome {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed(Option<String>),

    /// The test chose to be skipped, i.e. it found that the deployment lacks
    /// something it needs. The payload is an optional message.
    Skipped(Option<String>),
}

/// A wrapper for test functions. This is needed to allow [`TestCase`] to have a
/// `const` constructor for the inventory crate.
pub struct TestFunction {
    pub f: fn(&Framework) -> TestOutcome,
}

/// A description of a single test case.
pub struct TestCase {
    /// The path to the module containing the test case, from the
    /// `module_path!()` the `#[underlay_testcase]` attribute expands to.
    pub(crate) module_path: &'static str,

    /// The name of this test case, which is generally its function name.
    pub(crate) name: &'static str,

    /// A stable identifier that survives renames. Variants of one scenario
    /// share it.
    pub(crate) id: &'static str,

    /// The test function to execute to run this test.
    pub(crate) function: TestFunction,
}

impl TestCase {
    /// Constructs a new [`TestCase`].
    pub const fn new(
        module_path: &'static str,
        name: &'static str,
        id: &'static str,
        function: TestFunction,
    ) -> Self {
        Self { module_path, name, id, function }
    }

    /// Returns the test case's fully qualified name, i.e. `module_path::name`.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}::{}", self.module_path, self.name)
    }

    /// Returns the test case's name.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn id(&self) -> &str {
        self.id
    }

    /// Runs the test case's body against the supplied framework and returns
    /// its outcome.
    pub fn run(&self, framework: &Framework) -> TestOutcome {
        (self.function.f)(framework)
    }
}

inventory::collect!(TestCase);

pub fn all_test_cases() -> impl Iterator<Item = &'static TestCase> {
    inventory::iter::<TestCase>.into_iter()
}

/// Returns an iterator over the subset of tests for which (a) the fully
/// qualified name or id of the test includes every string in `must_include`,
/// and (b) neither includes any string in `must_exclude`.
pub fn filtered_test_cases<'rule>(
    must_include: &'rule [String],
    must_exclude: &'rule [String],
) -> impl Iterator<Item = &'static TestCase> + 'rule {
    all_test_cases().filter(|tc| {
        let matches = |pattern: &String| {
            tc.fully_qualified_name().contains(pattern.as_str())
                || tc.id == pattern.as_str()
        };
        must_include.iter().all(matches)
            && !must_exclude.iter().any(matches)
    })
}
