//! Typed access to properties described by a descriptor table
//!
//! ```ignore
//! let state = TypedProperty::<ServerStateCodec>::new(server_status, &SERVER_STATUS, "State")?;
//! let current = state.get(&client).await?;
//! ```

use super::cache::NodeCache;
use super::codec::ValueCodec;
use super::descriptor::{DescriptorTable, PropertyDescriptor};
use super::service::{AttributeService, BrowsePathResolver};
use opcua_core::{AttributeId, DataValue, NodeId, UaError, UaResult};
use std::fmt;
use std::marker::PhantomData;

/// Services needed to resolve and read typed properties
pub trait NodeAccess: AttributeService + BrowsePathResolver {
    fn node_cache(&self) -> &NodeCache;
}

/// One property of one parent node, decoded by `C`
pub struct TypedProperty<C> {
    parent: NodeId,
    table: &'static DescriptorTable,
    descriptor: &'static PropertyDescriptor,
    codec: PhantomData<fn() -> C>,
}

impl<C> Clone for TypedProperty<C> {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            table: self.table,
            descriptor: self.descriptor,
            codec: PhantomData,
        }
    }
}

impl<C> fmt::Debug for TypedProperty<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedProperty")
            .field("parent", &self.parent)
            .field("table", &self.table.name)
            .field("browse_name", &self.descriptor.browse_name)
            .finish()
    }
}

impl<C: ValueCodec> TypedProperty<C> {
    /// # Errors
    ///
    /// `UaError::InvalidArgument` when `table` has no such property, and
    /// `UaError::TypeMismatch` when its declared type differs from `C`'s
    pub fn new(parent: NodeId, table: &'static DescriptorTable, browse_name: &str) -> UaResult<Self> {
        let descriptor = table.get(browse_name).ok_or_else(|| {
            UaError::InvalidArgument(format!("{} has no property {}", table.name, browse_name))
        })?;
        if descriptor.value_type != C::value_type() {
            return Err(UaError::TypeMismatch {
                expected: descriptor.value_type.name(),
                actual: C::value_type().to_string(),
            });
        }
        Ok(Self {
            parent,
            table,
            descriptor,
            codec: PhantomData,
        })
    }

    pub fn parent(&self) -> &NodeId {
        &self.parent
    }

    pub fn descriptor(&self) -> &'static PropertyDescriptor {
        self.descriptor
    }

    /// Node holding the value, from the table's hint or browsed once and cached
    pub async fn node_id(&self, access: &(impl NodeAccess + ?Sized)) -> UaResult<NodeId> {
        if let Some(node) = self.table.hinted_node_id(&self.parent, self.descriptor) {
            return Ok(node);
        }
        let name = self.descriptor.browse_name();
        access
            .node_cache()
            .get_or_resolve(&self.parent, &name, || {
                access.resolve_child(self.parent.clone(), self.descriptor.reference_type_id(), name.clone())
            })
            .await
    }

    /// # Errors
    ///
    /// `UaError::Service` with the value's status when it is Bad, or
    /// `UaError::TypeMismatch` when the server returns another type
    pub async fn get(&self, access: &(impl NodeAccess + ?Sized)) -> UaResult<C::Value> {
        let node = self.node_id(access).await?;
        let value = access.read_attribute(node, AttributeId::Value).await?;
        if value.status().is_bad() {
            return Err(UaError::Service(value.status()));
        }
        C::decode(value.value())
    }

    /// # Errors
    ///
    /// `UaError::Service` with the operation status when the write is refused
    pub async fn set(&self, access: &(impl NodeAccess + ?Sized), value: &C::Value) -> UaResult<()> {
        let node = self.node_id(access).await?;
        let status = access
            .write_attribute(node, AttributeId::Value, DataValue::new(C::encode(value)))
            .await?;
        if status.is_bad() {
            log::debug!("Write of {} refused: {}", self.descriptor.browse_name, status);
            return Err(UaError::Service(status));
        }
        Ok(())
    }
}
