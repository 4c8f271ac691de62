pub mod cli;
pub mod config;
pub mod counter;
pub mod decoder;
pub mod flow;
pub mod http;
pub mod model;
pub mod provisioner;
pub mod reconcile;
