//! Service wiring and lifecycle.

mod container;

pub use container::ServiceContainer;
