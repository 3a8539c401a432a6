pub mod config;
pub mod deck;
pub mod error;
pub mod geometry;
pub mod handler;
pub mod io;
pub mod operator;
pub mod paired;
pub mod paths;
pub mod protocol;
pub mod reagent;
pub mod run;
pub mod stage;
pub mod status;
pub mod tips;
pub mod watchdog;

pub use error::{BenchError, Result};
