//! Game simulation modules

pub mod collision;
pub mod geometry;
pub mod room;
pub mod simulation;
pub mod snapshot;
