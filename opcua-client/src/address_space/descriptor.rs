//! Static descriptor tables for well-known properties
//!
//! A [`PropertyDescriptor`] names a child of some parent object by browse
//! name, together with the type its value must have. Tables group the
//! children of one object type; the typed accessor resolves a descriptor
//! against a concrete parent at runtime.

use once_cell::sync::Lazy;
use opcua_core::ids::{reference_types, variables};
use opcua_core::{NodeId, QualifiedName};
use std::collections::HashMap;
use std::fmt;

/// Expected type of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Int32,
    UInt32,
    Double,
    String,
    DateTime,
    LocalizedText,
    NodeId,
    ServerState,
    /// Structure with the given DataType id, carried in an extension object
    Structure(u32),
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Boolean => "Boolean",
            ValueType::Int32 => "Int32",
            ValueType::UInt32 => "UInt32",
            ValueType::Double => "Double",
            ValueType::String => "String",
            ValueType::DateTime => "DateTime",
            ValueType::LocalizedText => "LocalizedText",
            ValueType::NodeId => "NodeId",
            ValueType::ServerState => "ServerState",
            ValueType::Structure(_) => "Structure",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Structure(id) => write!(f, "Structure(i={})", id),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub browse_name: &'static str,
    pub namespace_index: u16,
    pub value_type: ValueType,
    /// Reference type from the parent, followed with its subtypes
    pub reference_type: u32,
    /// Namespace 0 id of the instance below the table's well-known parent
    pub node_id_hint: Option<u32>,
}

impl PropertyDescriptor {
    pub const fn component(browse_name: &'static str, value_type: ValueType) -> Self {
        Self {
            browse_name,
            namespace_index: 0,
            value_type,
            reference_type: reference_types::HAS_COMPONENT,
            node_id_hint: None,
        }
    }

    pub const fn property(browse_name: &'static str, value_type: ValueType) -> Self {
        Self {
            reference_type: reference_types::HAS_PROPERTY,
            ..Self::component(browse_name, value_type)
        }
    }

    pub const fn with_hint(mut self, node_id: u32) -> Self {
        self.node_id_hint = Some(node_id);
        self
    }

    pub fn browse_name(&self) -> QualifiedName {
        QualifiedName::new(self.namespace_index, self.browse_name)
    }

    pub fn reference_type_id(&self) -> NodeId {
        NodeId::ns0(self.reference_type)
    }
}

/// Descriptors of the children of one object type
#[derive(Debug)]
pub struct DescriptorTable {
    pub name: &'static str,
    /// Namespace 0 instance whose children carry the hinted node ids
    pub well_known_parent: Option<u32>,
    pub entries: &'static [PropertyDescriptor],
}

impl DescriptorTable {
    pub fn get(&self, browse_name: &str) -> Option<&'static PropertyDescriptor> {
        INDEX.get(&(self.name, browse_name)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static PropertyDescriptor> {
        self.entries.iter()
    }

    /// Node id known without browsing, when `parent` is the well-known instance
    pub fn hinted_node_id(&self, parent: &NodeId, descriptor: &PropertyDescriptor) -> Option<NodeId> {
        let well_known = self.well_known_parent?;
        let hint = descriptor.node_id_hint?;
        (parent.as_ns0_numeric() == Some(well_known)).then(|| NodeId::ns0(hint))
    }
}

/// Variables of a ServerStatusType instance
pub static SERVER_STATUS: DescriptorTable = DescriptorTable {
    name: "ServerStatus",
    well_known_parent: Some(variables::SERVER_SERVER_STATUS),
    entries: &[
        PropertyDescriptor::component("StartTime", ValueType::DateTime)
            .with_hint(variables::SERVER_SERVER_STATUS_START_TIME),
        PropertyDescriptor::component("CurrentTime", ValueType::DateTime)
            .with_hint(variables::SERVER_SERVER_STATUS_CURRENT_TIME),
        PropertyDescriptor::component("State", ValueType::ServerState)
            .with_hint(variables::SERVER_SERVER_STATUS_STATE),
        PropertyDescriptor::component("BuildInfo", ValueType::Structure(338))
            .with_hint(variables::SERVER_SERVER_STATUS_BUILD_INFO),
        PropertyDescriptor::component("SecondsTillShutdown", ValueType::UInt32)
            .with_hint(variables::SERVER_SERVER_STATUS_SECONDS_TILL_SHUTDOWN),
        PropertyDescriptor::component("ShutdownReason", ValueType::LocalizedText)
            .with_hint(variables::SERVER_SERVER_STATUS_SHUTDOWN_REASON),
    ],
};

/// Variables of a SessionDiagnosticsVariableType instance
pub static SESSION_DIAGNOSTICS: DescriptorTable = DescriptorTable {
    name: "SessionDiagnostics",
    well_known_parent: None,
    entries: &[
        PropertyDescriptor::component("SessionId", ValueType::NodeId),
        PropertyDescriptor::component("SessionName", ValueType::String),
        PropertyDescriptor::component("ServerUri", ValueType::String),
        PropertyDescriptor::component("EndpointUrl", ValueType::String),
        PropertyDescriptor::component("ActualSessionTimeout", ValueType::Double),
        PropertyDescriptor::component("MaxResponseMessageSize", ValueType::UInt32),
        PropertyDescriptor::component("ClientConnectionTime", ValueType::DateTime),
        PropertyDescriptor::component("ClientLastContactTime", ValueType::DateTime),
        PropertyDescriptor::component("CurrentSubscriptionsCount", ValueType::UInt32),
        PropertyDescriptor::component("CurrentMonitoredItemsCount", ValueType::UInt32),
        PropertyDescriptor::component("CurrentPublishRequestsInQueue", ValueType::UInt32),
        PropertyDescriptor::component("UnauthorizedRequestCount", ValueType::UInt32),
    ],
};

/// Properties of an AnalogItemType variable
pub static ANALOG_ITEM: DescriptorTable = DescriptorTable {
    name: "AnalogItem",
    well_known_parent: None,
    entries: &[
        PropertyDescriptor::property("Definition", ValueType::String),
        PropertyDescriptor::property("ValuePrecision", ValueType::Double),
        PropertyDescriptor::property("EngineeringUnitsScale", ValueType::Structure(opcua_core::ids::data_types::RATIONAL_NUMBER)),
    ],
};

pub static TABLES: &[&DescriptorTable] = &[&SERVER_STATUS, &SESSION_DIAGNOSTICS, &ANALOG_ITEM];

static INDEX: Lazy<HashMap<(&'static str, &'static str), &'static PropertyDescriptor>> = Lazy::new(|| {
    TABLES
        .iter()
        .flat_map(|table| table.entries.iter().map(move |d| ((table.name, d.browse_name), d)))
        .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_browse_name() {
        let state = SERVER_STATUS.get("State").unwrap();
        assert_eq!(state.value_type, ValueType::ServerState);
        assert_eq!(state.browse_name(), QualifiedName::new(0, "State"));
        assert_eq!(state.reference_type_id(), NodeId::ns0(reference_types::HAS_COMPONENT));
        assert!(SERVER_STATUS.get("SessionName").is_none());
        assert_eq!(
            SESSION_DIAGNOSTICS.get("SessionName").unwrap().value_type,
            ValueType::String
        );
        assert_eq!(
            ANALOG_ITEM.get("Definition").unwrap().reference_type,
            reference_types::HAS_PROPERTY
        );
    }

    #[test]
    fn test_hint_applies_only_to_well_known_parent() {
        let state = SERVER_STATUS.get("State").unwrap();
        assert_eq!(
            SERVER_STATUS.hinted_node_id(&NodeId::ns0(variables::SERVER_SERVER_STATUS), state),
            Some(NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE))
        );
        assert_eq!(SERVER_STATUS.hinted_node_id(&NodeId::numeric(2, 5000), state), None);
    }

    #[test]
    fn test_browse_names_unique_per_table() {
        for table in TABLES {
            let mut names: Vec<_> = table.iter().map(|d| d.browse_name).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), table.entries.len(), "{}", table.name);
        }
    }
}
