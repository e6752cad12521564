//! Utility modules for the builder

pub mod fileops;
pub mod timeout;
