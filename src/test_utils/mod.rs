//! Test utilities and mock implementations.
//!
//! Scripted stand-ins for the driver seams, for use in unit and
//! integration tests.

pub mod mocks;

pub use mocks::{LoggedStatement, MockConfig, MockConnection, MockDriver, MockHttpClient};
