mod common;

use common::MockServer;
use opcua_client::address_space::{
    ANALOG_ITEM, SERVER_STATUS, SESSION_DIAGNOSTICS, ServerState, ServerStateCodec, StringCodec,
    UInt32Codec,
};
use opcua_client::subscription::{ItemNotification, MonitoredItemRequest, SubscriptionEvent, SubscriptionSettings};
use opcua_client::{AttributeService, BlockingClient, Client, ClientEvent, ConnectionState, TypedProperty};
use opcua_core::ids::variables;
use opcua_core::{AttributeId, DataValue, NodeId, StatusCode, UaError, Variant};
use opcua_service::{ReadValueId, WriteValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn sensor() -> NodeId {
    NodeId::string(2, "Sensor1")
}

async fn connect(server: &MockServer) -> Client {
    Client::connect_with(common::config(), Arc::new(server.transport()), None)
        .await
        .unwrap()
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_connect_activates_session() {
    let server = MockServer::start();
    let client = connect(&server).await;

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(server.session_count(), 1);
    assert_eq!(server.request_count("ActivateSessionRequest"), 1);
    let value = client
        .read_attribute(NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE), AttributeId::Value)
        .await
        .unwrap();
    assert_eq!(value.value(), &Variant::Int32(0));
}

#[tokio::test]
async fn test_typed_properties_over_the_wire() {
    let server = MockServer::start();
    server.add_child(&sensor(), "Definition", NodeId::numeric(2, 10), Variant::from("flow"));
    server.add_child(
        &sensor(),
        "CurrentSubscriptionsCount",
        NodeId::numeric(2, 11),
        Variant::UInt32(2),
    );
    let client = connect(&server).await;

    let definition = TypedProperty::<StringCodec>::new(sensor(), &ANALOG_ITEM, "Definition").unwrap();
    assert_eq!(definition.get(&client).await.unwrap(), "flow");
    definition.set(&client, &"level".to_string()).await.unwrap();
    assert_eq!(
        server.value(&NodeId::numeric(2, 10)),
        Some(Variant::String("level".to_string()))
    );
    assert_eq!(definition.get(&client).await.unwrap(), "level");
    assert_eq!(server.request_count("TranslateBrowsePathsToNodeIdsRequest"), 1);

    let count =
        TypedProperty::<UInt32Codec>::new(sensor(), &SESSION_DIAGNOSTICS, "CurrentSubscriptionsCount").unwrap();
    assert_eq!(count.get(&client).await.unwrap(), 2);

    let state = TypedProperty::<ServerStateCodec>::new(
        NodeId::ns0(variables::SERVER_SERVER_STATUS),
        &SERVER_STATUS,
        "State",
    )
    .unwrap();
    assert_eq!(state.get(&client).await.unwrap(), ServerState::Running);
    assert_eq!(server.request_count("TranslateBrowsePathsToNodeIdsRequest"), 2);
}

#[tokio::test]
async fn test_property_failures_reach_the_caller() {
    let server = MockServer::start();
    server.add_child(&sensor(), "Definition", NodeId::numeric(2, 10), Variant::from("flow"));
    server.set_read_only(NodeId::numeric(2, 10));
    let client = connect(&server).await;

    let definition = TypedProperty::<StringCodec>::new(sensor(), &ANALOG_ITEM, "Definition").unwrap();
    let result = definition.set(&client, &"level".to_string()).await;
    assert!(matches!(result, Err(UaError::Service(s)) if s == StatusCode::BAD_NOT_WRITABLE));

    let missing = TypedProperty::<StringCodec>::new(NodeId::string(2, "Other"), &ANALOG_ITEM, "Definition").unwrap();
    let result = missing.get(&client).await;
    assert!(matches!(result, Err(UaError::Service(s)) if s == StatusCode::BAD_NO_MATCH));
}

#[tokio::test]
async fn test_data_changes_delivered_in_order() {
    let server = MockServer::start();
    let client = connect(&server).await;
    let (tx, mut values) = mpsc::unbounded_channel();

    let id = client
        .create_subscription(SubscriptionSettings::new(Duration::from_millis(100)), None)
        .await
        .unwrap();
    let created = client
        .create_monitored_items(id, vec![MonitoredItemRequest::value_of(NodeId::numeric(2, 10), Arc::new(tx))])
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert!(created[0].status.is_good());
    let handle = created[0].client_handle;

    for value in 1..=3 {
        server.push_data_change(id, handle, Variant::Int32(value));
    }
    for expected in 1..=3 {
        match next(&mut values).await {
            ItemNotification::DataChange { client_handle, value } => {
                assert_eq!(client_handle, handle);
                assert_eq!(value.value(), &Variant::Int32(expected));
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_lost_message_reported_and_later_ones_delivered() {
    let server = MockServer::start();
    let client = connect(&server).await;
    let (tx, mut values) = mpsc::unbounded_channel();
    let (events_tx, mut events) = mpsc::unbounded_channel();

    let id = client
        .create_subscription(
            SubscriptionSettings::new(Duration::from_millis(100)),
            Some(Arc::new(events_tx)),
        )
        .await
        .unwrap();
    let handle = client
        .create_monitored_items(id, vec![MonitoredItemRequest::value_of(NodeId::numeric(2, 10), Arc::new(tx))])
        .await
        .unwrap()[0]
        .client_handle;

    server.push_data_change(id, handle, Variant::Int32(1));
    assert!(matches!(next(&mut values).await, ItemNotification::DataChange { .. }));
    let lost = server.lose_next_message(id);
    server.push_data_change(id, handle, Variant::Int32(3));

    match next(&mut values).await {
        ItemNotification::DataChange { value, .. } => assert_eq!(value.value(), &Variant::Int32(3)),
        other => panic!("unexpected notification {:?}", other),
    }
    let event = loop {
        let event = next(&mut events).await;
        if !matches!(event, SubscriptionEvent::KeepAlive { .. }) {
            break event;
        }
    };
    assert_eq!(
        event,
        SubscriptionEvent::DataLost {
            subscription_id: id,
            missing: lost..=lost,
        }
    );
    // The publish response lists what the server retains, so the lost
    // message is reported without asking for it
    assert_eq!(server.request_count("RepublishRequest"), 0);
}

#[tokio::test]
async fn test_batches_split_by_server_operation_limits() {
    let server = MockServer::start();
    server.set_value(
        NodeId::ns0(variables::SERVER_SERVER_CAPABILITIES_OPERATION_LIMITS_MAX_NODES_PER_READ),
        Variant::UInt32(2),
    );
    server.set_value(
        NodeId::ns0(variables::SERVER_SERVER_CAPABILITIES_OPERATION_LIMITS_MAX_NODES_PER_WRITE),
        Variant::UInt32(3),
    );
    for n in 1..=5 {
        server.set_value(NodeId::numeric(2, 100 + n), Variant::Int32(n as i32));
    }
    let client = connect(&server).await;
    let limits = client.session().unwrap().operation_limits();
    assert_eq!((limits.max_nodes_per_read, limits.max_nodes_per_write), (2, 3));
    let reads_before = server.request_count("ReadRequest");

    let nodes = (1..=5)
        .map(|n| ReadValueId::new(NodeId::numeric(2, 100 + n), AttributeId::Value))
        .collect();
    let values: Vec<Variant> = client
        .read(nodes)
        .await
        .unwrap()
        .into_iter()
        .map(|value| value.value().clone())
        .collect();
    assert_eq!(values, (1..=5).map(Variant::Int32).collect::<Vec<_>>());
    assert_eq!(server.request_count("ReadRequest") - reads_before, 3);

    let writes = (1..=5)
        .map(|n| WriteValue::new(NodeId::numeric(2, 100 + n), AttributeId::Value, DataValue::new(Variant::Int32(0))))
        .collect();
    let statuses = client.write(writes).await.unwrap();
    assert_eq!(statuses, vec![StatusCode::GOOD; 5]);
    assert_eq!(server.request_count("WriteRequest"), 2);
    assert_eq!(server.value(&NodeId::numeric(2, 105)), Some(Variant::Int32(0)));
}

#[tokio::test]
async fn test_disconnect_closes_session() {
    let server = MockServer::start();
    let client = connect(&server).await;
    let mut events = client.events();

    client.disconnect().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(server.session_count(), 0);
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap().unwrap(), ClientEvent::Disconnected);
    let result = client
        .read_attribute(NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE), AttributeId::Value)
        .await;
    assert!(matches!(result, Err(UaError::InvalidState(_))));
    // A second disconnect is a no-op
    client.disconnect().await.unwrap();
}

#[test]
fn test_blocking_client_reads_typed_property() {
    let server_runtime = tokio::runtime::Runtime::new().unwrap();
    let server = server_runtime.block_on(async { MockServer::start() });
    server.add_child(&sensor(), "Definition", NodeId::numeric(2, 10), Variant::from("flow"));

    let blocking = BlockingClient::connect_with(common::config(), Arc::new(server.transport())).unwrap();
    let definition = TypedProperty::<StringCodec>::new(sensor(), &ANALOG_ITEM, "Definition").unwrap();
    assert_eq!(blocking.get(&definition).unwrap(), "flow");
    blocking.set(&definition, &"level".to_string()).unwrap();
    assert_eq!(blocking.get(&definition).unwrap(), "level");
    assert!(blocking.state().is_connected());

    let subscription = blocking
        .block_on(|client| async move {
            client
                .create_subscription(SubscriptionSettings::new(Duration::from_millis(100)), None)
                .await
        })
        .unwrap();
    assert_eq!(server.subscription_ids(), vec![subscription]);

    blocking.disconnect().unwrap();
    assert_eq!(server.session_count(), 0);
    drop(server);
}
