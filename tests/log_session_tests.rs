use futures::StreamExt;
use futures::stream::FuturesUnordered;
use primitive_proxy::in_memory::{InMemoryLog, InMemoryLogClient};
use primitive_proxy::primitives::{COUNTER_TYPE, CounterService};
use primitive_proxy::session::{
    Commit, LogClient, LogConsumer, LogEnvelope, LogProducer, LogRecord, ServiceContext,
    SessionPhase, StateMachineService,
};
use primitive_proxy::{
    Codec, ConnectionState, ExecutionMode, OperationId, PartitionId, PrimitiveConfig,
    PrimitiveName, PrimitiveOperation, ProxyError, ProxySession, ReplicatedLogSession, SessionId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn counter_config() -> PrimitiveConfig {
    PrimitiveConfig::new("hits", COUNTER_TYPE)
        .mode(ExecutionMode::LogReplicated)
        .key_aware(false)
}

fn replica(log: &InMemoryLog) -> (ReplicatedLogSession, Arc<InMemoryLogClient>) {
    replica_with(&counter_config(), log)
}

fn replica_with(
    config: &PrimitiveConfig,
    log: &InMemoryLog,
) -> (ReplicatedLogSession, Arc<InMemoryLogClient>) {
    let client = Arc::new(log.client());
    let session = ReplicatedLogSession::new(
        config,
        PartitionId::new(1),
        client.clone(),
        Box::new(CounterService::default()),
    );
    (session, client)
}

fn add(delta: i64) -> PrimitiveOperation {
    PrimitiveOperation::new(
        OperationId::command("add_and_get"),
        Codec::MessagePack.encode(&delta).unwrap(),
    )
}

fn get() -> PrimitiveOperation {
    PrimitiveOperation::new(OperationId::query("get"), Vec::new())
}

fn decode(bytes: Vec<u8>) -> i64 {
    Codec::MessagePack.decode(&bytes).unwrap()
}

#[tokio::test]
async fn test_command_resolves_with_replayed_result() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    assert_eq!(session.phase(), SessionPhase::Uninitialized);
    session.connect().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Ready);
    assert_eq!(session.state(), ConnectionState::Connected);

    assert_eq!(decode(session.submit(add(5)).await.unwrap()), 5);
    assert_eq!(decode(session.submit(add(2)).await.unwrap()), 7);
    assert_eq!(decode(session.submit(get()).await.unwrap()), 7);

    let stats = session.stats().unwrap();
    assert_eq!(stats.consumer_position, 2);
    assert_eq!(stats.last_appended_index, 2);
    assert_eq!(stats.pending_writes, 0);
    assert_eq!(stats.pending_reads, 0);
    assert_eq!(stats.local_sessions, 1);
}

#[tokio::test]
async fn test_query_waits_for_own_writes() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    let session = Arc::new(session);
    session.connect().await.unwrap();

    log.pause();
    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.submit(add(3)).await })
    };
    while session.last_appended_index() == 0 {
        tokio::task::yield_now().await;
    }

    let reader = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.submit(get()).await })
    };
    while session.stats().unwrap().pending_reads == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.consumer_position().unwrap(), 0);

    log.resume();
    assert_eq!(decode(writer.await.unwrap().unwrap()), 3);
    assert_eq!(decode(reader.await.unwrap().unwrap()), 3);
}

#[tokio::test]
async fn test_query_without_writes_answers_immediately() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    session.connect().await.unwrap();

    log.pause();
    let value = tokio::time::timeout(Duration::from_secs(1), session.submit(get()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decode(value), 0);
}

#[tokio::test]
async fn test_replicas_converge_and_ignore_foreign_writes_for_completion() {
    let log = InMemoryLog::new();
    let (first, _) = replica(&log);
    let (second, _) = replica(&log);
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    assert_eq!(decode(first.submit(add(10)).await.unwrap()), 10);
    assert_eq!(decode(second.submit(add(1)).await.unwrap()), 11);
    assert_eq!(decode(first.submit(add(1)).await.unwrap()), 12);

    assert_eq!(decode(first.submit(get()).await.unwrap()), 12);
    assert_eq!(decode(second.submit(get()).await.unwrap()), 12);
    assert!(first.has_local_session(second.session_id()).unwrap());
    assert!(second.has_local_session(first.session_id()).unwrap());
    assert_eq!(first.stats().unwrap().pending_writes, 0);
    assert_eq!(second.stats().unwrap().pending_writes, 0);
}

#[tokio::test]
async fn test_late_replica_replays_history() {
    let log = InMemoryLog::new();
    let (writer, _) = replica(&log);
    writer.connect().await.unwrap();
    for _ in 0..4 {
        writer.submit(add(1)).await.unwrap();
    }

    let (late, _) = replica(&log);
    late.connect().await.unwrap();
    assert_eq!(late.consumer_position().unwrap(), 4);
    assert_eq!(decode(late.submit(get()).await.unwrap()), 4);
}

#[tokio::test]
async fn test_start_index_skips_earlier_records() {
    let log = InMemoryLog::new();
    let (writer, _) = replica(&log);
    writer.connect().await.unwrap();
    writer.submit(add(100)).await.unwrap();
    writer.submit(add(1)).await.unwrap();

    let (late, _) = replica_with(&counter_config().log_start_index(2), &log);
    late.connect().await.unwrap();
    assert_eq!(decode(late.submit(get()).await.unwrap()), 1);
}

/// Counter that records how often it was initialized.
struct CountingInits {
    inner: CounterService,
    inits: Arc<AtomicUsize>,
}

impl StateMachineService for CountingInits {
    fn init(&mut self, context: &ServiceContext) {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.inner.init(context);
    }

    fn apply(&mut self, commit: Commit<'_>) -> primitive_proxy::Result<Vec<u8>> {
        self.inner.apply(commit)
    }
}

#[tokio::test]
async fn test_concurrent_connects_initialize_once() {
    let log = InMemoryLog::new();
    let inits = Arc::new(AtomicUsize::new(0));
    let session = ReplicatedLogSession::new(
        &counter_config(),
        PartitionId::new(1),
        Arc::new(log.client()),
        Box::new(CountingInits {
            inner: CounterService::default(),
            inits: Arc::clone(&inits),
        }),
    );

    // A second consumer registration would be rejected by the log.
    let (first, second) = tokio::join!(session.connect(), session.connect());
    first.unwrap();
    second.unwrap();
    session.connect().await.unwrap();
    assert_eq!(inits.load(Ordering::SeqCst), 1);

    session.submit(add(1)).await.unwrap();
    assert_eq!(session.consumer_position().unwrap(), 1);
}

#[tokio::test]
async fn test_failed_append_leaves_no_pending_write() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    session.connect().await.unwrap();

    log.fail_next_append(ProxyError::DeliveryFailure("log unavailable".into()));
    let err = session.submit(add(1)).await.unwrap_err();
    assert_eq!(err, ProxyError::DeliveryFailure("log unavailable".into()));
    assert_eq!(session.stats().unwrap().pending_writes, 0);
    assert_eq!(session.last_appended_index(), 0);

    assert_eq!(decode(session.submit(add(1)).await.unwrap()), 1);
}

#[tokio::test]
async fn test_failing_command_is_service_exception() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    session.connect().await.unwrap();

    session.submit(add(i64::MAX)).await.unwrap();
    let err = session.submit(add(1)).await.unwrap_err();
    assert!(matches!(err, ProxyError::ServiceException(_)));
    // The failed record still advanced the replay.
    assert_eq!(session.consumer_position().unwrap(), 2);
    assert_eq!(decode(session.submit(get()).await.unwrap()), i64::MAX);
}

#[tokio::test]
async fn test_close_fails_in_flight_operations() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    let session = Arc::new(session);
    session.connect().await.unwrap();

    log.pause();
    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.submit(add(1)).await })
    };
    while session.last_appended_index() == 0 {
        tokio::task::yield_now().await;
    }
    let reader = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.submit(get()).await })
    };
    while session.stats().unwrap().pending_reads == 0 {
        tokio::task::yield_now().await;
    }

    session.close().await.unwrap();
    assert!(matches!(
        writer.await.unwrap(),
        Err(ProxyError::ClosedSession(_))
    ));
    assert!(matches!(
        reader.await.unwrap(),
        Err(ProxyError::ClosedSession(_))
    ));
    assert!(matches!(
        session.submit(get()).await,
        Err(ProxyError::ClosedSession(_))
    ));
}

#[tokio::test]
async fn test_log_client_state_is_mirrored() {
    let log = InMemoryLog::new();
    let (session, client) = replica(&log);
    session.connect().await.unwrap();

    client.set_state(ConnectionState::Suspended);
    assert_eq!(session.state(), ConnectionState::Suspended);
    client.set_state(ConnectionState::Closed);
    assert!(matches!(
        session.submit(add(1)).await,
        Err(ProxyError::ClosedSession(_))
    ));
}

#[tokio::test]
async fn test_records_carry_envelopes() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    session.connect().await.unwrap();
    session.submit(add(4)).await.unwrap();

    let records = log.records();
    assert_eq!(records.len(), 1);
    let envelope = LogEnvelope::decode(Codec::MessagePack, &records[0].data).unwrap();
    assert_eq!(envelope.session_id, session.session_id());
    assert_eq!(envelope.write_index, 1);
    assert_eq!(envelope.operation, OperationId::command("add_and_get"));
    assert_eq!(envelope.primitive_name.as_str(), "hits");
}

async fn envelope_survives_the_log(codec: Codec) {
    let log = InMemoryLog::new();
    let client = log.client();
    client.connect().await.unwrap();

    let original = LogEnvelope {
        session_id: SessionId::generate(),
        primitive_name: PrimitiveName::new("hits"),
        write_index: 7,
        operation: OperationId::command("cas"),
        payload: codec.encode(&(3i64, 9i64)).unwrap(),
    };
    client.append(original.encode(codec).unwrap()).await.unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    client
        .consume(
            1,
            Arc::new(move |record: LogRecord| sink.lock().unwrap().push(record)),
        )
        .await
        .unwrap();

    let records = delivered.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].index, 1);
    let decoded = LogEnvelope::decode(codec, &records[0].data).unwrap();
    assert_eq!(decoded, original);
}

#[tokio::test]
async fn test_envelope_round_trips_through_log_with_messagepack() {
    envelope_survives_the_log(Codec::MessagePack).await;
}

#[tokio::test]
async fn test_envelope_round_trips_through_log_with_json() {
    envelope_survives_the_log(Codec::Json).await;
}

#[tokio::test]
async fn test_pipelined_commands_resolve_in_append_order() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    session.connect().await.unwrap();

    let deltas = [1i64, 2, 4, 8, 16, 32];
    log.pause();
    let mut pending = deltas
        .iter()
        .map(|delta| {
            let session = &session;
            async move { (*delta, session.submit(add(*delta)).await) }
        })
        .collect::<FuturesUnordered<_>>();

    let resolve = async {
        let mut resolved = Vec::new();
        while let Some((delta, result)) = pending.next().await {
            resolved.push((delta, decode(result.unwrap())));
        }
        resolved
    };
    let resume = async {
        while session.last_appended_index() < deltas.len() as u64 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.stats().unwrap().pending_writes, deltas.len());
        log.resume();
    };
    let (resolved, ()) = tokio::join!(resolve, resume);

    let appended: Vec<LogEnvelope> = log
        .records()
        .iter()
        .map(|record| LogEnvelope::decode(Codec::MessagePack, &record.data).unwrap())
        .collect();
    let write_indexes: Vec<u64> = appended.iter().map(|envelope| envelope.write_index).collect();
    assert_eq!(write_indexes, (1..=deltas.len() as u64).collect::<Vec<_>>());

    let mut total = 0;
    let expected: Vec<(i64, i64)> = appended
        .iter()
        .map(|envelope| {
            let delta: i64 = Codec::MessagePack.decode(&envelope.payload).unwrap();
            total += delta;
            (delta, total)
        })
        .collect();
    assert_eq!(resolved, expected);
    assert_eq!(session.stats().unwrap().pending_writes, 0);
}

#[tokio::test]
async fn test_other_primitives_on_shared_log_are_skipped() {
    let log = InMemoryLog::new();
    let (session, _) = replica(&log);
    session.connect().await.unwrap();

    let other = replica_with(
        &PrimitiveConfig::new("misses", COUNTER_TYPE).mode(ExecutionMode::LogReplicated),
        &log,
    )
    .0;
    other.connect().await.unwrap();
    other.submit(add(50)).await.unwrap();

    let raw = log.client();
    raw.connect().await.unwrap();
    raw.append(vec![0xc1, 0x00]).await.unwrap();
    session.submit(add(1)).await.unwrap();

    assert_eq!(decode(session.submit(get()).await.unwrap()), 1);
    assert_eq!(decode(other.submit(get()).await.unwrap()), 50);
    assert_eq!(session.consumer_position().unwrap(), 3);
}

#[tokio::test]
async fn test_two_producers_commit_concurrently() {
    let log = InMemoryLog::new();
    let (first, _) = replica(&log);
    let (second, _) = replica(&log);
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    log.pause();
    let resume = async {
        while log.len() < 2 {
            tokio::task::yield_now().await;
        }
        log.resume();
    };
    let (a, b, ()) = tokio::join!(first.submit(add(1)), second.submit(add(2)), resume);
    let mut results = vec![decode(a.unwrap()), decode(b.unwrap())];
    results.sort();
    assert!(results == vec![1, 3] || results == vec![2, 3]);

    for replica in [&first, &second] {
        assert_eq!(replica.consumer_position().unwrap(), log.last_index());
        assert!(replica.has_local_session(first.session_id()).unwrap());
        assert!(replica.has_local_session(second.session_id()).unwrap());
        assert_eq!(replica.stats().unwrap().pending_writes, 0);
    }
}
