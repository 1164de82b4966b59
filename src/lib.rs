//! # topicrelay
//!
//! `topicrelay` is a real-time notification relay. Clients hold a WebSocket
//! open, subscribe to named topics and receive every payload published to a
//! topic they hold. Subscribing to `notifications/<principal>` additionally
//! pushes that user's outstanding notifications.
//!
//! ## Core Modules
//!
//! - `broker`: the serialized topic broker, its registry and the subscribe hook seam.
//! - `client`: one live connection and its bounded outbound queue.
//! - `config`: layered configuration (defaults, file, `RELAY__*` environment).
//! - `notifications`: the subscribe hook that pushes BE/FL/EC notifications.
//! - `persistence`: storage traits and the sled-backed store.
//! - `server`: axum routes, bearer-token auth and HTTP errors.
//! - `transport`: control frames, envelopes and the WebSocket delivery pump.
//! - `utils`: the top-level error type and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod notifications;
pub mod persistence;
pub mod server;
pub mod transport;
pub mod utils;
