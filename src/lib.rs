//! OpenSky Network state-vector tracker.
//!
//! This library provides functionality to:
//! - Validate a geographic bounding box before it is queried
//! - Fetch state vectors for that box from the OpenSky REST API
//! - Decode OpenSky's positional JSON arrays into typed [`State`] records
//! - Poll an area at a fixed interval
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Client    │───▶│  Protocol   │───▶│  Consumer   │
//! │   (HTTP)    │    │  (Decoder)  │    │  (channel)  │
//! └─────────────┘    └─────────────┘    └─────────────┘
//!        │                                     │
//!        └─────────────┬───────────────────────┘
//!                      ▼
//!              ┌─────────────┐
//!              │   Tracker   │
//!              │ (poll loop) │
//!              └─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use skywatch::{BoundingBox, TrackerBuilder};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = TrackerBuilder::new()
//!         .bbox(BoundingBox::new(-40.11, -24.27, 139.15, 154.59))
//!         .poll_interval(Duration::from_secs(10))
//!         .build()?;
//!
//!     let (tx, mut rx) = tracker.channel();
//!     tokio::spawn(async move { tracker.run(tx).await });
//!
//!     while let Some(response) = rx.recv().await {
//!         println!("{} aircraft at {:?}", response.states.len(), response.time);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod protocol;
pub mod tracker;
pub mod types;

pub use client::{BoundingBox, BoundsError, ClientConfig, OpenSkyClient};
pub use protocol::{decode_response, decode_state, parse_response, DecodeError, Decoded};
pub use tracker::{Tracker, TrackerBuilder, TrackerConfig};
pub use types::{PositionSource, Response, State};
