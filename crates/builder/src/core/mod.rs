//! Core builder types and sequencing

pub mod builder;
pub mod config;
pub mod context;
