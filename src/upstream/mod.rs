// Home Assistant entity state client and projection

mod client;
mod entity;
mod error;

pub use client::{HassClient, StateSource};
pub use entity::{format_utc, NormalizedState, RawEntityState};
pub use error::UpstreamError;
