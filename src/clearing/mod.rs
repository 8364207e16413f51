pub mod input;
pub mod models;
