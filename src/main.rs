use anyhow::{Context, Result, bail};
use clap::Parser;
use primitive_proxy::in_memory::InMemoryCluster;
use primitive_proxy::primitives::{COUNTER_TYPE, CounterService, MAP_TYPE, MapService};
use primitive_proxy::{AggregateClient, AtomicCounter, Codec, DistributedMap, ExecutionMode};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "primitive-proxy")]
#[command(about = "Drives a partitioned map and counter against an in-memory cluster")]
struct Cli {
    /// Execution mode: direct or log
    #[arg(long, default_value = "direct")]
    mode: ExecutionMode,

    #[arg(long, default_value_t = 3)]
    partitions: u32,

    /// Number of keys written to the map
    #[arg(long, default_value_t = 16)]
    keys: u32,

    /// Codec for operations and log records: msgpack or json
    #[arg(long, default_value = "msgpack")]
    codec: Codec,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("primitive_proxy=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if cli.partitions == 0 {
        bail!("--partitions must be at least 1");
    }

    let cluster = InMemoryCluster::new()
        .with_service::<MapService>(MAP_TYPE)?
        .with_service::<CounterService>(COUNTER_TYPE)?;

    let map_config =
        DistributedMap::<u32>::config("demo-map", cli.mode, cli.partitions).codec(cli.codec);
    let map_client = Arc::new(AggregateClient::open(map_config, &cluster)?);
    map_client.connect().await.context("connecting map")?;
    let map = DistributedMap::<u32>::new(Arc::clone(&map_client))?;

    let counter_config = AtomicCounter::config("demo-writes", cli.mode).codec(cli.codec);
    let counter_client = Arc::new(AggregateClient::open(counter_config, &cluster)?);
    counter_client.connect().await.context("connecting counter")?;
    let counter = AtomicCounter::new(Arc::clone(&counter_client))?;

    for value in 0..cli.keys {
        let key = format!("key-{}", value);
        map.put(&key, &value).await?;
        counter.increment_and_get().await?;
    }

    let mut mismatches = 0;
    for value in 0..cli.keys {
        let key = format!("key-{}", value);
        if map.get(&key).await? != Some(value) {
            mismatches += 1;
        }
    }

    println!("mode:        {}", cli.mode);
    println!("state:       {}", map_client.sync_state().await?);
    println!("map size:    {}", map.size().await?);
    println!("writes:      {}", counter.get().await?);
    println!("mismatches:  {}", mismatches);
    for partition in map_client.partitions() {
        let keys = (0..cli.keys)
            .map(|value| format!("key-{}", value))
            .filter(|key| map_client.partition_for(Some(key.as_bytes())) == *partition)
            .count();
        match cli.mode {
            ExecutionMode::Direct => {
                let executions = cluster
                    .partition(map_client.name(), *partition)?
                    .map(|hosted| hosted.executions())
                    .unwrap_or_default();
                println!("{}: {} keys, {} executions", partition, keys, executions);
            }
            ExecutionMode::LogReplicated => {
                let records = cluster.log(*partition)?.len();
                println!("{}: {} keys, {} log records", partition, keys, records);
            }
        }
    }

    map_client.close().await?;
    counter_client.close().await?;
    if mismatches > 0 {
        bail!("{} keys read back a different value", mismatches);
    }
    Ok(())
}
