use primitive_proxy::in_memory::{InMemoryCluster, InMemoryPartition};
use primitive_proxy::primitives::{MAP_TYPE, MapService};
use primitive_proxy::session::PartitionTransport;
use primitive_proxy::{
    AggregateClient, ConnectionState, ExecutionMode, HashRouter, JumpHashRouter, OperationId,
    PartitionId, PartitionRouter, PartitionSession, PrimitiveBackend, PrimitiveConfig,
    PrimitiveOperation, ProxyError, ProxySession,
};
use std::sync::{Arc, Mutex};

fn map_cluster() -> InMemoryCluster {
    InMemoryCluster::new()
        .with_service::<MapService>(MAP_TYPE)
        .unwrap()
}

fn three_partitions(name: &str) -> PrimitiveConfig {
    PrimitiveConfig::new(name, MAP_TYPE).partition_count(3)
}

fn hosted(
    cluster: &InMemoryCluster,
    config: &PrimitiveConfig,
    partition: u32,
) -> Arc<InMemoryPartition> {
    cluster
        .partition(&config.name, PartitionId::new(partition))
        .unwrap()
        .unwrap()
}

fn recorder(client: &AggregateClient) -> Arc<Mutex<Vec<ConnectionState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.add_state_change_listener(Arc::new(move |state: &ConnectionState| {
        sink.lock().unwrap().push(*state);
    }));
    seen
}

#[tokio::test]
async fn test_connect_fans_out_and_aggregates() {
    let cluster = map_cluster();
    let config = three_partitions("users");
    let client = AggregateClient::open(config.clone(), &cluster).unwrap();
    let seen = recorder(&client);
    assert_eq!(client.state(), ConnectionState::Closed);

    client.connect().await.unwrap();
    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Connected);
    for partition in client.partitions() {
        assert_eq!(
            client.session(*partition).unwrap().state(),
            ConnectionState::Connected
        );
    }
    assert_eq!(*seen.lock().unwrap(), vec![ConnectionState::Connected]);

    client.close().await.unwrap();
    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Closed);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![ConnectionState::Connected, ConnectionState::Closed]
    );
}

#[tokio::test]
async fn test_suspension_and_recovery_notify_once() {
    let cluster = map_cluster();
    let config = three_partitions("sessions");
    let client = AggregateClient::open(config.clone(), &cluster).unwrap();
    client.connect().await.unwrap();
    client.sync_state().await.unwrap();
    let seen = recorder(&client);

    hosted(&cluster, &config, 2).set_state(ConnectionState::Suspended);
    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Suspended);

    hosted(&cluster, &config, 3).set_state(ConnectionState::Suspended);
    client.sync_state().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![ConnectionState::Suspended]);

    hosted(&cluster, &config, 2).set_state(ConnectionState::Connected);
    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Suspended);

    hosted(&cluster, &config, 3).set_state(ConnectionState::Connected);
    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Connected);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![ConnectionState::Suspended, ConnectionState::Connected]
    );
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_removed_listener_is_not_called() {
    let cluster = map_cluster();
    let client = AggregateClient::open(three_partitions("quiet"), &cluster).unwrap();
    let calls = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&calls);
    let id = client.add_state_change_listener(Arc::new(move |_: &ConnectionState| {
        *sink.lock().unwrap() += 1;
    }));
    assert!(client.remove_state_change_listener(id));
    assert!(!client.remove_state_change_listener(id));

    client.connect().await.unwrap();
    client.sync_state().await.unwrap();
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_connect_failure_surfaces_first_error() {
    let cluster = map_cluster();
    let config = three_partitions("flaky");
    let client = AggregateClient::open(config.clone(), &cluster).unwrap();
    hosted(&cluster, &config, 2)
        .fail_next_connect(ProxyError::DeliveryFailure("partition-2 down".into()));

    let err = client.connect().await.unwrap_err();
    assert_eq!(err, ProxyError::DeliveryFailure("partition-2 down".into()));
    assert_ne!(client.sync_state().await.unwrap(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_routing_is_stable_and_uses_every_partition() {
    let cluster = map_cluster();
    let client = AggregateClient::open(three_partitions("routes"), &cluster).unwrap();

    let mut used = std::collections::BTreeSet::new();
    for index in 0..64 {
        let key = format!("key-{}", index);
        let partition = client.partition_for(Some(key.as_bytes()));
        assert_eq!(partition, client.partition_for(Some(key.as_bytes())));
        assert_eq!(
            partition,
            HashRouter.route(key.as_bytes(), client.partitions())
        );
        used.insert(partition);
    }
    assert_eq!(used.len(), 3);
    assert_eq!(client.partition_for(None), PartitionId::new(1));
}

#[tokio::test]
async fn test_key_less_primitive_uses_first_partition() {
    let cluster = map_cluster();
    let config = three_partitions("single").key_aware(false);
    let client = AggregateClient::open(config, &cluster).unwrap();
    for index in 0..16 {
        let key = format!("key-{}", index);
        assert_eq!(client.partition_for(Some(key.as_bytes())), PartitionId::new(1));
    }
}

#[tokio::test]
async fn test_custom_router() {
    let cluster = map_cluster();
    let config = three_partitions("jump");
    let sessions = config
        .partitions
        .iter()
        .map(|partition| -> Arc<dyn ProxySession> {
            let transport: Arc<dyn PartitionTransport> =
                PrimitiveBackend::partition_transport(&cluster, &config, *partition).unwrap();
            Arc::new(PartitionSession::new(&config, *partition, transport))
        })
        .collect();
    let client = AggregateClient::new(config.clone(), sessions, Arc::new(JumpHashRouter)).unwrap();

    let key: &[u8] = b"jump-key";
    assert_eq!(
        client.partition_for(Some(key)),
        JumpHashRouter.route(key, &config.partitions)
    );
}

#[tokio::test]
async fn test_sessions_connected_before_aggregation_are_seen() {
    let cluster = map_cluster();
    let config = three_partitions("early");
    let mut sessions: Vec<Arc<dyn ProxySession>> = Vec::new();
    for partition in &config.partitions {
        let transport =
            PrimitiveBackend::partition_transport(&cluster, &config, *partition).unwrap();
        let session = Arc::new(PartitionSession::new(&config, *partition, transport));
        session.connect().await.unwrap();
        sessions.push(session);
    }

    let client = AggregateClient::new(config, sessions, Arc::new(HashRouter)).unwrap();
    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_partition_connecting_during_aggregation_is_not_lost() {
    let cluster = map_cluster();
    let config = three_partitions("racing");
    let sessions: Vec<Arc<PartitionSession>> = config
        .partitions
        .iter()
        .map(|partition| {
            let transport =
                PrimitiveBackend::partition_transport(&cluster, &config, *partition).unwrap();
            Arc::new(PartitionSession::new(&config, *partition, transport))
        })
        .collect();

    let connecting = sessions.clone();
    let connects = tokio::spawn(async move {
        for session in connecting {
            session.connect().await.unwrap();
        }
    });
    let client = AggregateClient::new(
        config,
        sessions
            .into_iter()
            .map(|session| session as Arc<dyn ProxySession>)
            .collect(),
        Arc::new(HashRouter),
    )
    .unwrap();
    connects.await.unwrap();

    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_session_set_must_match_partitions() {
    let cluster = map_cluster();
    let config = three_partitions("partial");
    let partition = PartitionId::new(1);
    let transport = PrimitiveBackend::partition_transport(&cluster, &config, partition).unwrap();
    let sessions: Vec<Arc<dyn ProxySession>> = vec![Arc::new(PartitionSession::new(
        &config, partition, transport,
    ))];

    let err = AggregateClient::new(config, sessions, Arc::new(HashRouter)).err();
    assert!(matches!(err, Some(ProxyError::ConfigError(_))));
}

#[tokio::test]
async fn test_broadcast_returns_partition_ordered_results() {
    let cluster = map_cluster();
    let client = AggregateClient::open(three_partitions("sizes"), &cluster).unwrap();
    client.connect().await.unwrap();

    let results = client
        .broadcast(PrimitiveOperation::new(OperationId::query("size"), Vec::new()))
        .await
        .unwrap();
    let partitions: Vec<_> = results.iter().map(|(partition, _)| *partition).collect();
    assert_eq!(partitions, client.partitions());
}

#[tokio::test]
async fn test_log_mode_aggregate_connects() {
    let cluster = map_cluster();
    let config = three_partitions("replicated").mode(ExecutionMode::LogReplicated);
    let client = AggregateClient::open(config, &cluster).unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Connected);

    client.delete().await.unwrap();
    assert_eq!(client.sync_state().await.unwrap(), ConnectionState::Closed);
    let err = client
        .submit(
            Some(b"k".as_slice()),
            PrimitiveOperation::new(OperationId::query("size"), Vec::new()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::ClosedSession(_)));
}
