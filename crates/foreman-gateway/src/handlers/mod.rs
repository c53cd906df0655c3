//! Request handlers, grouped by resource.

pub mod events;
pub mod plans;
pub mod sessions;
pub mod steps;
pub mod tools;
