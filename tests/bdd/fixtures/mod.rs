//! Scenario state shared by the harness's own BDD steps.

// The `#[fixture]` macro generates types that cannot have doc comments attached
#![allow(
    missing_docs,
    reason = "Generated fixture types cannot have doc comments attached"
)]

use rstest::fixture;
use rstest_bdd::Slot;
use std::cell::RefCell;
use test_support::FeatureDir;

#[derive(Default)]
pub struct TestWorld {
    /// Scratch feature tree the binary runs against.
    pub features: RefCell<Option<FeatureDir>>,

    // Process state
    pub run_status: Slot<bool>,
    pub command_stdout: Slot<String>,
    pub command_stderr: Slot<String>,

    // Simulated environment for output-mode resolution
    pub simulated_no_color: Slot<String>,
    pub simulated_term: Slot<String>,
    pub output_mode: Slot<String>,
}

#[fixture]
pub fn world() -> TestWorld {
    TestWorld::default()
}
