pub mod component;
pub mod compose;
pub mod config;
pub mod controller;
pub mod crd;
pub mod deployment;
pub mod error;
pub mod exec_gate;
pub mod ide_url;
pub mod kubestuff;
pub mod merge;
pub mod properties;
pub mod provision;
pub mod routing;
pub mod status;
