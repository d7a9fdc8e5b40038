//! Well-known namespace 0 identifiers

use crate::datatypes::NodeId;

/// Object node ids
pub mod objects {
    pub const ROOT_FOLDER: u32 = 84;
    pub const OBJECTS_FOLDER: u32 = 85;
    pub const SERVER: u32 = 2253;
    pub const SERVER_SERVER_DIAGNOSTICS: u32 = 2274;
}

/// Variable node ids
pub mod variables {
    pub const SERVER_NAMESPACE_ARRAY: u32 = 2255;
    pub const SERVER_SERVER_STATUS: u32 = 2256;
    pub const SERVER_SERVER_STATUS_START_TIME: u32 = 2257;
    pub const SERVER_SERVER_STATUS_CURRENT_TIME: u32 = 2258;
    pub const SERVER_SERVER_STATUS_STATE: u32 = 2259;
    pub const SERVER_SERVER_STATUS_BUILD_INFO: u32 = 2260;
    pub const SERVER_SERVER_STATUS_SECONDS_TILL_SHUTDOWN: u32 = 2992;
    pub const SERVER_SERVER_STATUS_SHUTDOWN_REASON: u32 = 2993;
    pub const SERVER_SERVER_CAPABILITIES_OPERATION_LIMITS_MAX_NODES_PER_READ: u32 = 11705;
    pub const SERVER_SERVER_CAPABILITIES_OPERATION_LIMITS_MAX_NODES_PER_WRITE: u32 = 11707;
}

/// Reference type node ids
pub mod reference_types {
    pub const REFERENCES: u32 = 31;
    pub const HIERARCHICAL_REFERENCES: u32 = 33;
    pub const ORGANIZES: u32 = 35;
    pub const HAS_PROPERTY: u32 = 46;
    pub const HAS_COMPONENT: u32 = 47;
}

/// Data type node ids
pub mod data_types {
    pub const BOOLEAN: u32 = 1;
    pub const INT32: u32 = 6;
    pub const UINT32: u32 = 7;
    pub const DOUBLE: u32 = 11;
    pub const STRING: u32 = 12;
    pub const DATE_TIME: u32 = 13;
    pub const NODE_ID: u32 = 17;
    pub const LOCALIZED_TEXT: u32 = 21;
    pub const STRUCTURE: u32 = 22;
    pub const BASE_DATA_TYPE: u32 = 24;
    pub const DURATION: u32 = 290;
    pub const SERVER_STATE: u32 = 852;
    pub const RATIONAL_NUMBER: u32 = 18806;
}

/// Node id of the server state variable polled by session keep-alive
pub fn server_state() -> NodeId {
    NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE)
}

/// Node attributes addressable by Read and Write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass = 2,
    BrowseName = 3,
    DisplayName = 4,
    Description = 5,
    WriteMask = 6,
    UserWriteMask = 7,
    IsAbstract = 8,
    Symmetric = 9,
    InverseName = 10,
    ContainsNoLoops = 11,
    EventNotifier = 12,
    Value = 13,
    DataType = 14,
    ValueRank = 15,
    ArrayDimensions = 16,
    AccessLevel = 17,
    UserAccessLevel = 18,
    MinimumSamplingInterval = 19,
    Historizing = 20,
    Executable = 21,
    UserExecutable = 22,
    DataTypeDefinition = 23,
    RolePermissions = 24,
    UserRolePermissions = 25,
    AccessRestrictions = 26,
    AccessLevelEx = 27,
}

impl AttributeId {
    pub fn from_u32(value: u32) -> Option<Self> {
        use AttributeId::*;
        Some(match value {
            1 => NodeId,
            2 => NodeClass,
            3 => BrowseName,
            4 => DisplayName,
            5 => Description,
            6 => WriteMask,
            7 => UserWriteMask,
            8 => IsAbstract,
            9 => Symmetric,
            10 => InverseName,
            11 => ContainsNoLoops,
            12 => EventNotifier,
            13 => Value,
            14 => DataType,
            15 => ValueRank,
            16 => ArrayDimensions,
            17 => AccessLevel,
            18 => UserAccessLevel,
            19 => MinimumSamplingInterval,
            20 => Historizing,
            21 => Executable,
            22 => UserExecutable,
            23 => DataTypeDefinition,
            24 => RolePermissions,
            25 => UserRolePermissions,
            26 => AccessRestrictions,
            27 => AccessLevelEx,
            _ => return None,
        })
    }

    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_id_mapping() {
        assert_eq!(AttributeId::from_u32(13), Some(AttributeId::Value));
        assert_eq!(AttributeId::Value.as_u32(), 13);
        assert_eq!(AttributeId::from_u32(0), None);
    }
}
