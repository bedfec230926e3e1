pub mod executor;
pub mod operations;
pub mod registry;
pub mod remote;
pub mod service;
pub mod step;
pub mod tool_adapters;
pub mod validation;
