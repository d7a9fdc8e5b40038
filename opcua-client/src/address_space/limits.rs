//! Server operation limits
//!
//! Read and Write requests larger than the server's MaxNodesPerRead or
//! MaxNodesPerWrite are sent as several requests and their results joined
//! in request order.

use super::service::AttributeService;
use crate::invoker::ServiceInvoker;
use opcua_core::ids::variables;
use opcua_core::{AttributeId, DataValue, NodeId, UaResult, Variant};
use opcua_service::{
    ReadRequest, ReadResponse, ReadValueId, ResponseHeader, ServiceRequest, ServiceResponse, WriteRequest,
    WriteResponse,
};
use std::time::Duration;

/// Most operations the server accepts in one request; 0 = no limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationLimits {
    pub max_nodes_per_read: u32,
    pub max_nodes_per_write: u32,
}

impl OperationLimits {
    /// Read the limits advertised under the server's capabilities
    ///
    /// A limit the server does not expose stays unlimited.
    pub async fn fetch<S: AttributeService + ?Sized>(service: &S) -> Self {
        let nodes = vec![
            ReadValueId::new(
                NodeId::ns0(variables::SERVER_SERVER_CAPABILITIES_OPERATION_LIMITS_MAX_NODES_PER_READ),
                AttributeId::Value,
            ),
            ReadValueId::new(
                NodeId::ns0(variables::SERVER_SERVER_CAPABILITIES_OPERATION_LIMITS_MAX_NODES_PER_WRITE),
                AttributeId::Value,
            ),
        ];
        match service.read(nodes).await {
            Ok(values) => {
                let limits = Self {
                    max_nodes_per_read: limit(values.first()),
                    max_nodes_per_write: limit(values.get(1)),
                };
                log::debug!("Server operation limits: {:?}", limits);
                limits
            }
            Err(e) => {
                log::debug!("Operation limits unavailable: {}", e);
                Self::default()
            }
        }
    }
}

fn limit(value: Option<&DataValue>) -> u32 {
    match value {
        Some(value) if value.is_good() => match value.value() {
            Variant::UInt32(n) => *n,
            _ => 0,
        },
        _ => 0,
    }
}

fn exceeds(limit: u32, len: usize) -> bool {
    limit != 0 && len > limit as usize
}

/// Send `request`, splitting a Read or Write that exceeds `limits`
pub(crate) async fn invoke_within<I: ServiceInvoker + ?Sized>(
    invoker: &I,
    limits: OperationLimits,
    request: ServiceRequest,
    timeout: Duration,
) -> UaResult<ServiceResponse> {
    match request {
        ServiceRequest::ReadRequest(read) if exceeds(limits.max_nodes_per_read, read.nodes_to_read.len()) => {
            split_read(invoker, limits.max_nodes_per_read as usize, read, timeout).await
        }
        ServiceRequest::WriteRequest(write) if exceeds(limits.max_nodes_per_write, write.nodes_to_write.len()) => {
            split_write(invoker, limits.max_nodes_per_write as usize, write, timeout).await
        }
        request => invoker.invoke(request, timeout).await,
    }
}

async fn split_read<I: ServiceInvoker + ?Sized>(
    invoker: &I,
    size: usize,
    read: ReadRequest,
    timeout: Duration,
) -> UaResult<ServiceResponse> {
    log::debug!("Reading {} nodes in batches of {}", read.nodes_to_read.len(), size);
    let mut merged = ReadResponse {
        response_header: ResponseHeader::default(),
        results: Vec::with_capacity(read.nodes_to_read.len()),
        diagnostic_infos: Vec::new(),
    };
    for batch in read.nodes_to_read.chunks(size) {
        let request = ReadRequest {
            request_header: read.request_header.clone(),
            max_age: read.max_age,
            timestamps_to_return: read.timestamps_to_return,
            nodes_to_read: batch.to_vec(),
        };
        let response: ReadResponse = invoker.invoke(request.into(), timeout).await?.into_typed()?;
        merged.response_header = response.response_header;
        merged.results.extend(response.results);
        merged.diagnostic_infos.extend(response.diagnostic_infos);
    }
    Ok(merged.into())
}

async fn split_write<I: ServiceInvoker + ?Sized>(
    invoker: &I,
    size: usize,
    write: WriteRequest,
    timeout: Duration,
) -> UaResult<ServiceResponse> {
    log::debug!("Writing {} nodes in batches of {}", write.nodes_to_write.len(), size);
    let mut merged = WriteResponse {
        response_header: ResponseHeader::default(),
        results: Vec::with_capacity(write.nodes_to_write.len()),
        diagnostic_infos: Vec::new(),
    };
    for batch in write.nodes_to_write.chunks(size) {
        let request = WriteRequest {
            request_header: write.request_header.clone(),
            nodes_to_write: batch.to_vec(),
        };
        let response: WriteResponse = invoker.invoke(request.into(), timeout).await?.into_typed()?;
        merged.response_header = response.response_header;
        merged.results.extend(response.results);
        merged.diagnostic_infos.extend(response.diagnostic_infos);
    }
    Ok(merged.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::MockServiceInvoker;
    use opcua_core::{Identifier, StatusCode};

    fn read_response(nodes: &[ReadValueId]) -> UaResult<ServiceResponse> {
        Ok(ReadResponse {
            response_header: ResponseHeader::default(),
            results: nodes
                .iter()
                .map(|node| match node.node_id.identifier {
                    Identifier::Numeric(n) => DataValue::new(Variant::UInt32(n)),
                    _ => DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN),
                })
                .collect(),
            diagnostic_infos: Vec::new(),
        }
        .into())
    }

    #[tokio::test]
    async fn test_read_split_by_max_nodes_per_read() {
        let mut invoker = MockServiceInvoker::new();
        invoker
            .expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ReadRequest(r) if r.nodes_to_read.len() <= 2))
            .times(3)
            .returning(|request, _| match request {
                ServiceRequest::ReadRequest(r) => read_response(&r.nodes_to_read),
                _ => unreachable!(),
            });
        let limits = OperationLimits {
            max_nodes_per_read: 2,
            max_nodes_per_write: 0,
        };
        let nodes: Vec<ReadValueId> = (1..=5)
            .map(|n| ReadValueId::new(NodeId::numeric(2, n), AttributeId::Value))
            .collect();
        let request = ServiceRequest::from(ReadRequest {
            nodes_to_read: nodes,
            ..Default::default()
        });

        let response: ReadResponse = invoke_within(&invoker, limits, request, Duration::from_secs(1))
            .await
            .unwrap()
            .into_typed()
            .unwrap();
        let values: Vec<Variant> = response.results.iter().map(|v| v.value().clone()).collect();
        assert_eq!(values, (1..=5).map(Variant::UInt32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_batch_fails_the_write() {
        let mut invoker = MockServiceInvoker::new();
        let mut sequence = mockall::Sequence::new();
        invoker
            .expect_invoke()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| {
                Ok(WriteResponse {
                    response_header: ResponseHeader::default(),
                    results: vec![StatusCode::GOOD; 3],
                    diagnostic_infos: Vec::new(),
                }
                .into())
            });
        invoker
            .expect_invoke()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Err(opcua_core::UaError::Timeout));
        let limits = OperationLimits {
            max_nodes_per_read: 0,
            max_nodes_per_write: 3,
        };
        let values = (1..=4)
            .map(|n| opcua_service::WriteValue::new(NodeId::numeric(2, n), AttributeId::Value, DataValue::new(1)))
            .collect();
        let request = ServiceRequest::from(WriteRequest {
            nodes_to_write: values,
            ..Default::default()
        });

        let result = invoke_within(&invoker, limits, request, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(opcua_core::UaError::Timeout)));
    }

    #[tokio::test]
    async fn test_fetch_reads_advertised_limits() {
        let mut invoker = MockServiceInvoker::new();
        invoker.expect_invoke().times(1).returning(|_, _| {
            Ok(ReadResponse {
                response_header: ResponseHeader::default(),
                results: vec![
                    DataValue::new(Variant::UInt32(100)),
                    DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN),
                ],
                diagnostic_infos: Vec::new(),
            }
            .into())
        });
        assert_eq!(
            OperationLimits::fetch(&invoker).await,
            OperationLimits {
                max_nodes_per_read: 100,
                max_nodes_per_write: 0,
            }
        );
    }
}
