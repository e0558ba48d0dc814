pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod request;
pub mod runtime;

pub use client::{Attempt, AttemptOutcome, CallOutcome, ResilientClient};
pub use error::{CallError, ErrorKind};
