//! HTTP request handlers

pub mod fund;
pub mod health;
pub mod metrics;
pub mod uploads;

pub use fund::*;
pub use health::*;
pub use metrics::*;
pub use uploads::*;

#[cfg(test)]
pub(crate) mod test_support;
