//! Straightforward async load-test driver for WebSocket broadcast servers!
//!
//! This library drives many concurrent virtual users against a broadcast
//! endpoint: each one opens its own WebSocket connection, sends a tagged
//! message plus two random payloads on a fixed period, validates the shape
//! of everything broadcast back to it, and tears itself down on a hard
//! deadline. Check outcomes from all users are aggregated into a pass rate
//! that decides the run's verdict.
//!
//! It's an async library based on the tokio runtime, speaking the
//! client side of the [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! over a tokio TcpStream, performing handshakes, masking frames and
//! handling opcodes itself, so the driver measures the server and nothing
//! else.
//!
//! The ramp is a declarative list of stages ([`ramp::RampSchedule`]);
//! [`runner::Runner`] is a reference executor for it, any other scheduler
//! can consume the same description.
pub mod checks;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod message;
pub mod metrics;
pub mod payload;
pub mod ramp;
pub mod request;
pub mod runner;
pub mod session;
pub mod workload;
mod tests;
