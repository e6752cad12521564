//! Step execution stages

pub(crate) mod executors;

pub(crate) use executors::execute_step;
