pub mod app;
pub mod core;
pub mod plugin;
pub mod scheduler;
pub mod store;

include!(concat!(env!("OUT_DIR"), "/version.rs"));
