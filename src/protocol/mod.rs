//! Binary wire protocols spoken by gateway modules.

pub mod rpleth;
