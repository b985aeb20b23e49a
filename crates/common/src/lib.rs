//! Common utilities and types shared across eipwatch components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
