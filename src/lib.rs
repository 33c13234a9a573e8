pub mod ai;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod media;
pub mod model;
pub mod postprocess;
pub mod publisher;
pub mod quota;
pub mod regenerate;
pub mod schedule;
pub mod settings;
