//! sqlx-backed driver: pooling, argument binding and wire rendering.

pub mod binary;
pub mod bind;
pub mod postgres;

pub use bind::{ParamType, build_arguments};
pub use postgres::{SqlxConnection, SqlxDriver, to_driver_error};
