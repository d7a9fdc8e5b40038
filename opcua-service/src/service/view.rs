//! TranslateBrowsePathsToNodeIds

use crate::header::{RequestHeader, ResponseHeader};
use opcua_core::{
    binary_struct, DiagnosticInfo, ExpandedNodeId, NodeId, QualifiedName, StatusCode,
};

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct RelativePathElement {
        pub reference_type_id: NodeId,
        pub is_inverse: bool,
        pub include_subtypes: bool,
        pub target_name: QualifiedName,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct RelativePath {
        pub elements: Vec<RelativePathElement>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct BrowsePath {
        pub starting_node: NodeId,
        pub relative_path: RelativePath,
    }
}

impl BrowsePath {
    /// Single-hop path from `starting_node` to a child named `target_name`
    /// over `reference_type_id` and its subtypes
    pub fn child(starting_node: NodeId, reference_type_id: NodeId, target_name: QualifiedName) -> Self {
        Self {
            starting_node,
            relative_path: RelativePath {
                elements: vec![RelativePathElement {
                    reference_type_id,
                    is_inverse: false,
                    include_subtypes: true,
                    target_name,
                }],
            },
        }
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct BrowsePathTarget {
        pub target_id: ExpandedNodeId,
        /// u32::MAX when the whole path was followed
        pub remaining_path_index: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct BrowsePathResult {
        pub status_code: StatusCode,
        pub targets: Vec<BrowsePathTarget>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct TranslateBrowsePathsToNodeIdsRequest {
        pub request_header: RequestHeader,
        pub browse_paths: Vec<BrowsePath>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct TranslateBrowsePathsToNodeIdsResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<BrowsePathResult>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}
