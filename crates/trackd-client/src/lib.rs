//! Client library for the trackd daemon.
//!
//! Connects to the daemon's Unix socket, correlates responses to requests
//! by id, and hands broadcast events to the caller over a separate channel
//! so a consumer can await request results while independently reacting to
//! `playlist_item_downloaded` and friends.
//!
//! ```ignore
//! let mut client = Client::connect("/run/trackd/trackd.sock").await?;
//! let mut events = client.take_events().expect("events taken once");
//!
//! let response = client.request("ping", JsonMap::new()).await?;
//! assert!(response.is_success());
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}: {:?}", event.event, event.data);
//! }
//! ```

mod client;

pub use client::{Client, ClientError, KEEPALIVE_INTERVAL, REQUEST_TIMEOUT};
