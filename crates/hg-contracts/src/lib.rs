//! Data contracts for the Hidden Grammar analyst: reference data, mode and
//! lens catalogs, session state, feedback records and lifecycle events.

pub mod chat;
pub mod events;
pub mod framework;
pub mod lenses;
pub mod modes;
pub mod session;
