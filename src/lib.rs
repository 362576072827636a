pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod pricing;
pub mod regression;
pub mod reroute;
pub mod state;
