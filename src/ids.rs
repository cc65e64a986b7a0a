//! Identifier and random value generation for fixtures.
//!
//! The test database is shared by every scenario and every run, so fixture
//! rows are keyed by freshly generated identifiers instead of relying on
//! cleanup.

use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

/// Length of the suffix appended to fixture names.
pub const SUFFIX_LEN: usize = 8;

/// Generate a new opaque identifier.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a lowercase alphanumeric suffix for fixture names.
#[must_use]
pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect()
}

/// Generate a non-negative random number rendered as text.
#[must_use]
pub fn random_number() -> String {
    rand::thread_rng().r#gen::<u32>().to_string()
}

/// Pick a number in `0..upper`; `upper` of zero yields zero.
#[must_use]
pub fn random_below(upper: u32) -> u32 {
    if upper == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..upper)
}
