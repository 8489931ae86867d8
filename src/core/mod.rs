pub mod config;
pub mod envelope;
pub mod gateway;
pub mod normalize;
pub mod orchestrator;
pub mod persistence;
