//! Typed property access over the server address space
//!
//! A [`TypedProperty`] pairs a parent node with a [`PropertyDescriptor`]
//! from a static [`DescriptorTable`] and a [`ValueCodec`] for its value
//! type. Child node ids are resolved by browse name once and kept in the
//! [`NodeCache`].

mod accessor;
mod cache;
mod codec;
mod descriptor;
mod limits;
mod service;

pub use accessor::{NodeAccess, TypedProperty};
pub use cache::{CacheStatistics, NodeCache};
pub use codec::{
    BooleanCodec, BuildInfo, DateTimeCodec, DoubleCodec, Int32Codec, LocalizedTextCodec, NodeIdCodec,
    RationalNumber, ServerState, ServerStateCodec, StringCodec, StructureCodec, StructuredValue,
    UInt32Codec, ValueCodec,
};
pub use descriptor::{
    ANALOG_ITEM, DescriptorTable, PropertyDescriptor, SERVER_STATUS, SESSION_DIAGNOSTICS, TABLES,
    ValueType,
};
pub use limits::OperationLimits;
pub(crate) use limits::invoke_within;
pub use service::{AttributeService, BrowsePathResolver};
