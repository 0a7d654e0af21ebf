//! Device assignment strategies.

pub mod strategies;

pub use strategies::{AssignmentContext, AssignmentStrategy, PinnedOrNearestStrategy};
