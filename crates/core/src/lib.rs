pub mod cognition;
pub mod config;
pub mod error;
pub mod io;
pub mod memory;
pub mod resource_space;
pub mod runtime;
pub mod sensory;
pub mod types;
