pub mod artifact;
pub mod config;
pub mod engine;
pub mod fuzzer;
pub mod generator;
pub mod liveness;
pub mod quarantine;
pub mod registry;
pub mod transport;
