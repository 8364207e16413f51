pub mod caseid;
pub mod engine;
pub mod models;
