// Configuration loading
pub mod config;

// Home Assistant client and entity projection
pub mod upstream;

// Refresh cache in front of the upstream
pub mod cache;

// HTTP API
pub mod api;
