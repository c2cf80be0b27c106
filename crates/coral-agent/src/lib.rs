pub mod agent;
pub mod config;
pub mod connection;
pub mod coralizer;
pub mod driver;
pub mod errors;
pub mod models;
pub mod profile;
pub mod prompt_template;
pub mod providers;
pub mod toolbox;
pub mod toolset;
