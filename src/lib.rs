pub mod agent;
pub mod aws;
pub mod backend;
pub mod config;
pub mod logging;
pub mod platform;
pub mod settings;
pub mod training;

#[cfg(test)]
mod testing;
