pub mod cleaning;
pub mod config;
pub mod dates;
pub mod error;
pub mod feature_builder;
pub mod features;
pub mod frame;
pub mod http_client;
pub mod joined;
pub mod jobs;
pub mod names;
pub mod pivot;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod tipping;
