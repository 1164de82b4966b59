//! The `utils` module provides the shared pieces used across `topicrelay`:
//! the top-level error type and logging initialisation.

pub mod error;
pub mod logging;
