//! Relay Core - Decoupling Buffers and a Message Routing Hub
//!
//! This crate connects producers and consumers that run at different speeds.
//! A [`Buffer`] lets a producer hand values off without waiting for the
//! consumer, and a [`Hub`] routes messages to the endpoint they name, with a
//! fallback for everything it cannot place. Both tear down in a fixed order
//! once their producers close.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Hub                                  │
//! │                                                                  │
//! │  ingress ──▶ ┌────────────────────────┐     ┌──────────────────┐ │
//! │              │ Buffer                 │     │ router thread    │ │
//! │              │ listener ─▶ SafeQueue  │────▶│ destination()    │ │
//! │              │            ─▶ drainer  │     └───┬─────────┬────┘ │
//! │              └────────────────────────┘         │         │      │
//! │                                      entry point│         │miss  │
//! │  route.from ──▶ forwarder ──▶ route.to          ▼         ▼      │
//! │                                          ┌──────────┐ ┌────────┐ │
//! │                                          │ consumer │ │fallback│ │
//! │                                          └──────────┘ └────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Shutdown
//!
//! Closing a producer endpoint is the only shutdown signal. The buffer
//! drains what it holds and closes its outbound side, the router and
//! forwarders finish, and [`Hub::cleanup`] closes every destination exactly
//! once with the fallback last, so downstream consumers finish in turn.
//!
//! # Quick Start
//!
//! ```no_run
//! use relay_core::{channel, EndpointId, Hub, Message};
//!
//! let (fallback, errors) = channel::<Message>(16);
//! let (display, lines) = channel::<Message>(16);
//!
//! let mut hub = Hub::new(fallback);
//! hub.add_entry_point(display.clone()).unwrap();
//! let ingress = hub.init().unwrap();
//!
//! ingress.send(Message::text(display.id(), "hello")).unwrap();
//! ingress.send(Message::text(EndpointId::reserve(), "nobody home")).unwrap();
//! ingress.close().unwrap();
//!
//! let report = hub.cleanup();
//! assert_eq!(lines.iter().count(), 1);
//! assert_eq!(errors.iter().count(), 1);
//! assert_eq!(report.closed.last(), Some(&errors.id()));
//! ```
//!
//! # Module Overview
//!
//! - [`queue`]: Two-lock unbounded FIFO
//! - [`endpoint`]: Bounded channels with identity and explicit close
//! - [`buffer`]: Listener/drainer pair bridging two endpoints
//! - [`hub`]: Routing graph, statistics and cleanup
//! - [`cleanup`]: Task groups and once-only destination closing
//! - [`message`]: The [`Routable`] contract and the bundled [`Message`] type
//! - [`config`]: TOML, environment and CLI configuration
//! - [`logging`]: `tracing` subscriber setup

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod cleanup;
pub mod config;
pub mod endpoint;
pub mod hub;
pub mod logging;
pub mod message;
pub mod queue;

// Re-exports for convenience
pub use buffer::Buffer;
pub use cleanup::{close_destinations, ClosedEndpoints, TaskError, TaskGroup};
pub use endpoint::{
    channel, EndpointError, EndpointId, Receiver, RecvTimeoutError, SendError, Sender,
    TryRecvError, TrySendError, WeakSender,
};
pub use hub::{CleanupReport, Hub, HubConfig, HubError, HubStats};
pub use message::{Destination, Message, Routable};
pub use queue::SafeQueue;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig, RelayToml,
};
