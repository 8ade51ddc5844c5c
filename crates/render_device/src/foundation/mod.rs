//! Foundation utilities shared by every render module

pub mod logging;
pub mod math;
