//! Command implementations for the Huddle CLI.

pub mod config;
pub mod demo;
pub mod serve;

mod status;
