//! OPC-UA client stack
//!
//! The stack is organized as a workspace of layered crates:
//!
//! - `opcua-core`: built-in types, binary encoding, status codes and errors
//! - `opcua-service`: service request and response structures
//! - `opcua-transport`: byte streams over TCP and in-process pipes
//! - `opcua-security`: security policies, key derivation, signing and encryption
//! - `opcua-channel`: UA-TCP secure channel with token renewal
//! - `opcua-client`: sessions, subscriptions, reconnection and typed access
//!
//! # Usage
//!
//! ```no_run
//! use opcua::prelude::*;
//!
//! # async fn run() -> UaResult<()> {
//! let config = ClientConfig::builder("opc.tcp://localhost:4840").build()?;
//! let client = Client::connect(config).await?;
//! let state = TypedProperty::<ServerStateCodec>::new(
//!     NodeId::ns0(opcua::ids::variables::SERVER_SERVER_STATUS),
//!     &SERVER_STATUS,
//!     "State",
//! )?;
//! println!("server is {:?}", state.get(&client).await?);
//! client.disconnect().await
//! # }
//! ```

pub use opcua_core::{StatusCode, UaError, UaResult};
pub use opcua_core::datatypes::*;

pub mod ids {
    pub use opcua_core::ids::*;
}

pub mod encoding {
    pub use opcua_core::encoding::*;
}

pub mod service {
    pub use opcua_service::*;
}

pub mod transport {
    pub use opcua_transport::*;
}

pub mod security {
    pub use opcua_security::*;
}

pub mod channel {
    pub use opcua_channel::*;
}

pub mod client {
    pub use opcua_client::*;
}

/// Types needed by most client applications
pub mod prelude {
    pub use opcua_client::address_space::*;
    pub use opcua_client::subscription::{
        ItemNotification, MonitoredItemHandler, MonitoredItemRequest, SubscriptionEvent,
        SubscriptionListener, SubscriptionSettings,
    };
    pub use opcua_client::{
        BlockingClient, Client, ClientConfig, ClientEvent, ConnectionState, ServiceInvoker,
    };
    pub use opcua_core::{
        AttributeId, DataValue, DateTime, LocalizedText, NodeId, QualifiedName, StatusCode,
        UaError, UaResult, Variant,
    };
    pub use opcua_security::SecurityPolicy;
}
