//! Background worker that drains the durable job queue.

pub mod runner;
