//! Dispatcher process: configuration loading, service wiring, the HTTP
//! server and the background sweeps.

pub mod app;
pub mod shutdown;
