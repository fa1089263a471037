//! Discord integration for the starboard.
//!
//! This crate connects the highlight engine to Discord:
//! - **Events** (`events`) - reaction dispatch decoding and handler routing
//! - **Gateway runner** (`socket`) - session supervision and envelope pump
//! - **Gateway transport** (`transport`) - websocket session with heartbeats
//! - **REST client** (`rest`) - `ChatApi` over the Discord HTTP API
//! - **Embeds** (`embed`) - highlight message payloads
//!
//! # Architecture
//!
//! ```text
//! DiscordGatewayTransport → GatewayRunner → EventDispatcher → StarboardReactionHandler → HighlightEngine
//!                                                                                          ↓
//!                                                                     DiscordRestClient ← ChatApi
//! ```

pub mod embed;
pub mod events;
pub mod rest;
pub mod socket;
pub mod transport;
