//! Notification composition, the durable job queue, and bank-mutation
//! reconciliation.

pub mod composer;
pub mod ingest;
pub mod queue;
