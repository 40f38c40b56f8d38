//! Immutable decoded snapshots and the query view over them.
//!
//! The decoder builds a fresh [`StaticObjects`] and/or [`DynamicObjects`] for every frame
//! that carries tags of that kind, then publishes it behind an `Arc`. Nothing mutates a
//! snapshot after publication, so a reader holding one keeps seeing the same values no
//! matter how many newer frames arrive.

pub mod axis;
mod dynamic_objects;
mod frame;
mod static_objects;

pub use axis::{AxisMapping, Direction};
pub use dynamic_objects::DynamicObjects;
pub use frame::{Frame, SegmentTransform};
pub use static_objects::StaticObjects;
