pub mod artifacts;
pub mod client;
pub mod common;
pub mod config;

pub mod kubernetes;

pub mod staging;
pub mod validation;
