//! BDD test module providing fixtures and step definitions.

pub mod fixtures;
pub mod steps;
