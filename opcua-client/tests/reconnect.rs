mod common;

use common::MockServer;
use opcua_client::subscription::{ItemNotification, MonitoredItemRequest, SubscriptionEvent, SubscriptionSettings};
use opcua_client::{AttributeService, Client, ClientEvent, ConnectionState};
use opcua_core::ids::variables;
use opcua_core::{AttributeId, NodeId, StatusCode, UaError, Variant};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    server: MockServer,
    client: Client,
    events: broadcast::Receiver<ClientEvent>,
    subscription_id: u32,
    client_handle: u32,
    values: mpsc::UnboundedReceiver<ItemNotification>,
    subscription_events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

/// Connected client with one subscription monitoring one item
async fn fixture() -> Fixture {
    let server = MockServer::start();
    let client = Client::connect_with(common::config(), Arc::new(server.transport()), None)
        .await
        .unwrap();
    let events = client.events();
    let (values_tx, values) = mpsc::unbounded_channel();
    let (events_tx, subscription_events) = mpsc::unbounded_channel();
    let subscription_id = client
        .create_subscription(
            SubscriptionSettings::new(Duration::from_millis(100)),
            Some(Arc::new(events_tx)),
        )
        .await
        .unwrap();
    let created = client
        .create_monitored_items(
            subscription_id,
            vec![MonitoredItemRequest::value_of(NodeId::numeric(2, 10), Arc::new(values_tx))],
        )
        .await
        .unwrap();
    Fixture {
        server,
        client,
        events,
        subscription_id,
        client_handle: created[0].client_handle,
        values,
        subscription_events,
    }
}

impl Fixture {
    /// Wait for the outcome of a reconnection
    async fn reconnection(&mut self) -> ClientEvent {
        loop {
            let event = timeout(WAIT, self.events.recv()).await.unwrap().unwrap();
            match event {
                ClientEvent::ConnectionLost { .. } => continue,
                other => return other,
            }
        }
    }

    async fn next_value(&mut self) -> (u32, Variant) {
        match timeout(WAIT, self.values.recv()).await.unwrap().unwrap() {
            ItemNotification::DataChange { client_handle, value } => (client_handle, value.value().clone()),
            other => panic!("unexpected notification {:?}", other),
        }
    }

    /// Subscription events other than keep-alives and publish failures
    fn lifecycle_events(&mut self) -> Vec<SubscriptionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.subscription_events.try_recv() {
            match event {
                SubscriptionEvent::KeepAlive { .. } | SubscriptionEvent::PublishFailure { .. } => {}
                other => events.push(other),
            }
        }
        events
    }
}

#[tokio::test]
async fn test_session_transferred_to_new_channel() {
    let mut fixture = fixture().await;
    let session_id = fixture.client.session().unwrap().session_id().clone();
    let channel_id = fixture.client.channel().unwrap().channel_id();

    fixture.server.drop_connections();

    assert_eq!(
        fixture.reconnection().await,
        ClientEvent::Reconnected {
            attempts: 1,
            session_recreated: false,
        }
    );
    assert_eq!(fixture.client.state(), ConnectionState::Connected);
    assert_eq!(fixture.client.session().unwrap().session_id(), &session_id);
    assert_ne!(fixture.client.channel().unwrap().channel_id(), channel_id);
    assert_eq!(fixture.server.request_count("CreateSessionRequest"), 1);
    assert_eq!(fixture.server.request_count("TransferSubscriptionsRequest"), 0);

    fixture
        .server
        .push_data_change(fixture.subscription_id, fixture.client_handle, Variant::Int32(7));
    assert_eq!(fixture.next_value().await, (fixture.client_handle, Variant::Int32(7)));
    assert!(fixture.lifecycle_events().contains(&SubscriptionEvent::CommunicationLost {
        subscription_id: fixture.subscription_id,
    }));
}

#[tokio::test]
async fn test_new_session_takes_over_subscriptions() {
    let mut fixture = fixture().await;
    let session_id = fixture.client.session().unwrap().session_id().clone();

    fixture.server.forget_sessions();
    fixture.server.drop_connections();

    assert_eq!(
        fixture.reconnection().await,
        ClientEvent::Reconnected {
            attempts: 1,
            session_recreated: true,
        }
    );
    assert_ne!(fixture.client.session().unwrap().session_id(), &session_id);
    assert_eq!(fixture.server.request_count("TransferSubscriptionsRequest"), 1);
    assert_eq!(fixture.client.subscriptions().subscription_ids(), vec![fixture.subscription_id]);

    // Same subscription id, same client handle, new session
    fixture
        .server
        .push_data_change(fixture.subscription_id, fixture.client_handle, Variant::Int32(8));
    assert_eq!(fixture.next_value().await, (fixture.client_handle, Variant::Int32(8)));
}

#[tokio::test]
async fn test_subscriptions_recreated_when_transfer_unsupported() {
    let mut fixture = fixture().await;
    let old_id = fixture.subscription_id;

    fixture.server.set_transfer_supported(false);
    fixture.server.forget_sessions();
    fixture.server.drop_connections();

    assert_eq!(
        fixture.reconnection().await,
        ClientEvent::Reconnected {
            attempts: 1,
            session_recreated: true,
        }
    );
    let ids = fixture.client.subscriptions().subscription_ids();
    assert_eq!(ids.len(), 1);
    let new_id = ids[0];
    assert_ne!(new_id, old_id);

    let events = fixture.lifecycle_events();
    assert!(events.contains(&SubscriptionEvent::TransferFailed {
        subscription_id: old_id,
        status: StatusCode::BAD_SERVICE_UNSUPPORTED,
    }));
    assert!(events.contains(&SubscriptionEvent::Resubscribed { old_id, new_id }));

    // The recreated item kept its client handle, so routing is unchanged
    fixture
        .server
        .push_data_change(new_id, fixture.client_handle, Variant::Int32(9));
    assert_eq!(fixture.next_value().await, (fixture.client_handle, Variant::Int32(9)));
}

#[tokio::test]
async fn test_attempt_budget_ends_in_failed() {
    let mut fixture = fixture().await;
    let transport = fixture.server.transport();
    let attempts_before = transport.connection_attempts();

    transport.set_refusing(true);
    fixture.server.drop_connections();

    assert_eq!(fixture.reconnection().await, ClientEvent::ReconnectFailed { attempts: 5 });
    assert_eq!(fixture.client.state(), ConnectionState::Failed { attempts: 5 });
    assert_eq!(transport.connection_attempts() - attempts_before, 5);

    let result = fixture
        .client
        .read_attribute(NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE), AttributeId::Value)
        .await;
    assert!(matches!(result, Err(UaError::ReconnectFailed { attempts: 5 })));
    assert!(matches!(fixture.client.session(), Err(UaError::ReconnectFailed { attempts: 5 })));
}

#[tokio::test]
async fn test_calls_fail_fast_while_reconnecting() {
    let mut fixture = fixture().await;
    let transport = fixture.server.transport();
    let mut states = fixture.client.state_changes();

    transport.set_refusing(true);
    fixture.server.drop_connections();
    timeout(WAIT, states.wait_for(|state| matches!(state, ConnectionState::Reconnecting { .. })))
        .await
        .unwrap()
        .unwrap();

    let result = fixture
        .client
        .read_attribute(NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE), AttributeId::Value)
        .await;
    assert!(matches!(result, Err(UaError::Reconnecting)));

    transport.set_refusing(false);
    assert!(matches!(fixture.reconnection().await, ClientEvent::Reconnected { .. }));
    let value = fixture
        .client
        .read_attribute(NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE), AttributeId::Value)
        .await
        .unwrap();
    assert_eq!(value.value(), &Variant::Int32(0));
}

#[tokio::test]
async fn test_calls_fail_fast_while_subscriptions_transfer() {
    let mut fixture = fixture().await;

    fixture.server.stall_transfers(true);
    fixture.server.forget_sessions();
    fixture.server.drop_connections();
    timeout(WAIT, async {
        while fixture.server.request_count("TransferSubscriptionsRequest") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // The new session exists but is not handed out until its subscriptions are on it
    let result = fixture
        .client
        .read_attribute(NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE), AttributeId::Value)
        .await;
    assert!(matches!(result, Err(UaError::Reconnecting)));
    assert!(matches!(fixture.client.session(), Err(UaError::Reconnecting)));

    fixture.server.stall_transfers(false);
    assert!(matches!(
        fixture.reconnection().await,
        ClientEvent::Reconnected {
            session_recreated: true,
            ..
        }
    ));
    assert_eq!(fixture.client.subscriptions().subscription_ids(), vec![fixture.subscription_id]);
    let value = fixture
        .client
        .read_attribute(NodeId::ns0(variables::SERVER_SERVER_STATUS_STATE), AttributeId::Value)
        .await
        .unwrap();
    assert_eq!(value.value(), &Variant::Int32(0));
}
