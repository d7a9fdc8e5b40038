//! Read and Write

use crate::header::{RequestHeader, ResponseHeader};
use opcua_core::{
    binary_enum, binary_struct, AttributeId, DataValue, DiagnosticInfo, NodeId, QualifiedName,
    StatusCode,
};

binary_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum TimestampsToReturn {
        Source = 0,
        Server = 1,
        #[default]
        Both = 2,
        Neither = 3,
        Invalid = 4,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ReadValueId {
        pub node_id: NodeId,
        pub attribute_id: u32,
        pub index_range: String,
        pub data_encoding: QualifiedName,
    }
}

impl ReadValueId {
    pub fn new(node_id: NodeId, attribute_id: AttributeId) -> Self {
        Self {
            node_id,
            attribute_id: attribute_id.as_u32(),
            ..Default::default()
        }
    }

    /// Read the Value attribute of `node_id`
    pub fn value_of(node_id: NodeId) -> Self {
        Self::new(node_id, AttributeId::Value)
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ReadRequest {
        pub request_header: RequestHeader,
        pub max_age: f64,
        pub timestamps_to_return: TimestampsToReturn,
        pub nodes_to_read: Vec<ReadValueId>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ReadResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<DataValue>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct WriteValue {
        pub node_id: NodeId,
        pub attribute_id: u32,
        pub index_range: String,
        pub value: DataValue,
    }
}

impl WriteValue {
    pub fn new(node_id: NodeId, attribute_id: AttributeId, value: DataValue) -> Self {
        Self {
            node_id,
            attribute_id: attribute_id.as_u32(),
            index_range: String::new(),
            value,
        }
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct WriteRequest {
        pub request_header: RequestHeader,
        pub nodes_to_write: Vec<WriteValue>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct WriteResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<StatusCode>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}
