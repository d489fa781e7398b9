//! Common test utilities and fixtures.

pub mod env;
pub mod transfer;

#[allow(unused_imports)]
pub use env::*;
#[allow(unused_imports)]
pub use transfer::*;
