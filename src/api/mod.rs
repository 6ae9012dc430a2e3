// HTTP API

pub mod status;

pub use status::{create_status_router, StatusAppState};
