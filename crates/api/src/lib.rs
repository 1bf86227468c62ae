//! HTTP boundary: the bank-mutation webhook and the session admin surface.

pub mod routes;
pub mod state;
