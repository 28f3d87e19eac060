//! Multi-relay client transport.
//!
//! - [`RelayConnection`]: one WebSocket with status tracking and keepalive
//! - [`RelayPool`]: URL-keyed set of connections with fan-out and fan-in
//! - [`Client`]: validation, subscription de-duplication and collection

pub mod client;
pub mod config;
pub mod error;
pub mod nip05;
pub mod pool;
pub mod relay;
pub mod subscription;

pub use client::{Client, Notification, PublishConfirmation};
pub use config::{ClientConfig, ConfigError, PoolConfig, ReconnectPolicy, RelayConfig};
pub use error::{ClientError, Result};
pub use pool::{PoolEvent, RelayPool};
pub use relay::{RelayConnection, RelayEvent, RelayStatus};
pub use subscription::{EventOutcome, SubscriptionRegistry};
