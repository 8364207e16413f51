pub mod accumulator;
pub mod checkpoint;
pub mod dump;
pub mod orchestrator;
