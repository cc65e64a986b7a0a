//! Step definition modules for BDD scenarios.
//!
//! The `rstest-bdd` macros generate wrapper code that trips a few Clippy
//! lints; they are suppressed here once rather than on every step.

#![expect(
    clippy::unnecessary_wraps,
    reason = "rstest-bdd macros require Result returns for step functions"
)]
#![expect(
    clippy::needless_pass_by_value,
    reason = "rstest-bdd step signatures prioritise ergonomics"
)]

mod cli;
mod output_mode;
