pub mod alert;
pub mod attacker;
pub mod metrics;
pub mod orchestrator;
pub mod sampler;
pub mod selector;
