//! OPC-UA client engine
//!
//! This crate builds the client side of an OPC-UA connection on top of the
//! secure channel:
//! - [`Session`]: create, activate, transfer and close, with keep-alive
//! - [`subscription`]: subscriptions, monitored items and the publish engine
//! - [`reconnect`]: backoff and the connection state machine
//! - [`address_space`]: typed property access driven by descriptor tables
//! - [`Client`]: ties them together and recovers lost connections
//! - [`BlockingClient`]: synchronous adapter owning a runtime
//!
//! # Example
//!
//! ```ignore
//! use opcua_client::{Client, ClientConfig};
//! use opcua_client::subscription::{MonitoredItemRequest, SubscriptionSettings};
//!
//! let client = Client::connect(ClientConfig::builder("opc.tcp://plc:4840").build()?).await?;
//! let id = client.create_subscription(SubscriptionSettings::default(), None).await?;
//! ```

pub mod address_space;
pub mod blocking;
pub mod client;
pub mod config;
pub mod invoker;
pub mod reconnect;
pub mod session;
pub mod subscription;

pub use address_space::{AttributeService, BrowsePathResolver, NodeAccess, NodeCache, OperationLimits, TypedProperty};
pub use blocking::BlockingClient;
pub use client::{Client, ClientEvent};
pub use config::{
    ChannelSettings, ClientConfig, ClientConfigBuilder, IdentityConfig, PublishSettings,
    ReconnectConfig, SecurityMode,
};
pub use invoker::ServiceInvoker;
pub use reconnect::{Backoff, ConnectionState, ReconnectController, ReconnectTarget};
pub use session::{Session, SessionSettings, SessionState};
