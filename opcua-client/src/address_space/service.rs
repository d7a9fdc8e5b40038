//! Attribute and view services used by the typed accessor

use crate::invoker::ServiceInvoker;
use async_trait::async_trait;
use opcua_core::{AttributeId, DataValue, NodeId, QualifiedName, StatusCode, UaError, UaResult};
use opcua_service::{
    BrowsePath, BrowsePathResult, ReadRequest, ReadResponse, ReadValueId, RequestHeader,
    TimestampsToReturn, TranslateBrowsePathsToNodeIdsRequest, TranslateBrowsePathsToNodeIdsResponse,
    WriteRequest, WriteResponse, WriteValue,
};
use std::time::Duration;

const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

fn expect_len<T>(results: Vec<T>, expected: usize, service: &str) -> UaResult<Vec<T>> {
    if results.len() == expected {
        Ok(results)
    } else {
        Err(UaError::Protocol(format!(
            "{} returned {} results for {} operations",
            service,
            results.len(),
            expected
        )))
    }
}

/// Read and Write
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttributeService: Send + Sync {
    async fn read(&self, nodes: Vec<ReadValueId>) -> UaResult<Vec<DataValue>>;

    async fn write(&self, values: Vec<WriteValue>) -> UaResult<Vec<StatusCode>>;

    async fn read_attribute(&self, node_id: NodeId, attribute_id: AttributeId) -> UaResult<DataValue> {
        self.read(vec![ReadValueId::new(node_id, attribute_id)])
            .await?
            .pop()
            .ok_or_else(|| UaError::Protocol("Read returned no result".to_string()))
    }

    /// Write one attribute, returning the operation status
    async fn write_attribute(&self, node_id: NodeId, attribute_id: AttributeId, value: DataValue) -> UaResult<StatusCode> {
        self.write(vec![WriteValue::new(node_id, attribute_id, value)])
            .await?
            .pop()
            .ok_or_else(|| UaError::Protocol("Write returned no result".to_string()))
    }
}

/// TranslateBrowsePathsToNodeIds
#[async_trait]
pub trait BrowsePathResolver: Send + Sync {
    async fn translate(&self, paths: Vec<BrowsePath>) -> UaResult<Vec<BrowsePathResult>>;

    /// Follow one reference of `reference_type` (or a subtype) from
    /// `parent` to the child named `name`
    ///
    /// Returns `Ok(None)` when no such child exists.
    async fn resolve_child(&self, parent: NodeId, reference_type: NodeId, name: QualifiedName) -> UaResult<Option<NodeId>> {
        let result = self
            .translate(vec![BrowsePath::child(parent, reference_type, name)])
            .await?
            .pop()
            .ok_or_else(|| UaError::Protocol("TranslateBrowsePathsToNodeIds returned no result".to_string()))?;

        if result.status_code == StatusCode::BAD_NO_MATCH {
            return Ok(None);
        }
        if result.status_code.is_bad() {
            return Err(UaError::Service(result.status_code));
        }
        // Targets in other servers cannot be read through this session
        Ok(result
            .targets
            .iter()
            .filter(|target| target.remaining_path_index == u32::MAX)
            .find_map(|target| target.target_id.to_local()))
    }
}

#[async_trait]
impl<T: ServiceInvoker + ?Sized> AttributeService for T {
    async fn read(&self, nodes: Vec<ReadValueId>) -> UaResult<Vec<DataValue>> {
        let count = nodes.len();
        let request = ReadRequest {
            request_header: RequestHeader::default(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: nodes,
        };
        let response: ReadResponse = self.invoke(request.into(), SERVICE_TIMEOUT).await?.into_typed()?;
        expect_len(response.results, count, "Read")
    }

    async fn write(&self, values: Vec<WriteValue>) -> UaResult<Vec<StatusCode>> {
        let count = values.len();
        let request = WriteRequest {
            request_header: RequestHeader::default(),
            nodes_to_write: values,
        };
        let response: WriteResponse = self.invoke(request.into(), SERVICE_TIMEOUT).await?.into_typed()?;
        expect_len(response.results, count, "Write")
    }
}

#[async_trait]
impl<T: ServiceInvoker + ?Sized> BrowsePathResolver for T {
    async fn translate(&self, paths: Vec<BrowsePath>) -> UaResult<Vec<BrowsePathResult>> {
        let count = paths.len();
        let request = TranslateBrowsePathsToNodeIdsRequest {
            request_header: RequestHeader::default(),
            browse_paths: paths,
        };
        let response: TranslateBrowsePathsToNodeIdsResponse =
            self.invoke(request.into(), SERVICE_TIMEOUT).await?.into_typed()?;
        expect_len(response.results, count, "TranslateBrowsePathsToNodeIds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::MockServiceInvoker;
    use opcua_core::{ExpandedNodeId, Variant};
    use opcua_service::{BrowsePathTarget, ResponseHeader, ServiceRequest, ServiceResponse};

    #[tokio::test]
    async fn test_read_through_invoker() {
        let mut invoker = MockServiceInvoker::new();
        invoker
            .expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ReadRequest(r) if r.nodes_to_read.len() == 1))
            .times(1)
            .returning(|_, _| {
                Ok(ReadResponse {
                    response_header: ResponseHeader::default(),
                    results: vec![DataValue::new(Variant::Int32(7))],
                    diagnostic_infos: Vec::new(),
                }
                .into())
            });

        let value = invoker
            .read_attribute(NodeId::numeric(2, 10), AttributeId::Value)
            .await
            .unwrap();
        assert_eq!(value.value(), &Variant::Int32(7));
    }

    #[tokio::test]
    async fn test_result_count_mismatch_is_protocol_error() {
        let mut invoker = MockServiceInvoker::new();
        invoker
            .expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::WriteRequest(_)))
            .returning(|_, _| {
                Ok(WriteResponse {
                    response_header: ResponseHeader::default(),
                    results: Vec::new(),
                    diagnostic_infos: Vec::new(),
                }
                .into())
            });

        let result = invoker
            .write_attribute(NodeId::numeric(2, 10), AttributeId::Value, DataValue::new(Variant::Int32(1)))
            .await;
        assert!(matches!(result, Err(UaError::Protocol(_))));
    }

    fn target_name(request: &ServiceRequest) -> Option<&QualifiedName> {
        match request {
            ServiceRequest::TranslateBrowsePathsToNodeIdsRequest(r) => {
                Some(&r.browse_paths[0].relative_path.elements[0].target_name)
            }
            _ => None,
        }
    }

    fn translated(result: BrowsePathResult) -> UaResult<ServiceResponse> {
        Ok(TranslateBrowsePathsToNodeIdsResponse {
            response_header: ResponseHeader::default(),
            results: vec![result],
            diagnostic_infos: Vec::new(),
        }
        .into())
    }

    #[tokio::test]
    async fn test_resolve_child_no_match_is_none() {
        let mut invoker = MockServiceInvoker::new();
        invoker
            .expect_invoke()
            .withf(|request, _| target_name(request) == Some(&QualifiedName::new(0, "Missing")))
            .returning(|_, _| {
                translated(BrowsePathResult {
                    status_code: StatusCode::BAD_NO_MATCH,
                    targets: Vec::new(),
                })
            });
        invoker
            .expect_invoke()
            .withf(|request, _| target_name(request) == Some(&QualifiedName::new(0, "State")))
            .returning(|_, _| {
                translated(BrowsePathResult {
                    status_code: StatusCode::GOOD,
                    targets: vec![BrowsePathTarget {
                        target_id: ExpandedNodeId::from(NodeId::numeric(2, 42)),
                        remaining_path_index: u32::MAX,
                    }],
                })
            });

        let parent = NodeId::numeric(2, 1);
        let has_component = NodeId::ns0(opcua_core::ids::reference_types::HAS_COMPONENT);
        assert_eq!(
            invoker
                .resolve_child(parent.clone(), has_component.clone(), QualifiedName::new(0, "Missing"))
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            invoker
                .resolve_child(parent, has_component, QualifiedName::new(0, "State"))
                .await
                .unwrap(),
            Some(NodeId::numeric(2, 42))
        );
    }
}
