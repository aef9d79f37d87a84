//! Load generator for the pooled Redis client.
//!
//! Spawns concurrent tasks that issue SET/GET pairs through one registered
//! pool, then reports throughput and pool counters.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use respool_client::{ClientConfig, ClientError, RedisClient};
use respool_pool::PoolRegistry;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const POOL_KEY: &str = "bench";

struct BenchArgs {
    config: ClientConfig,
    clients: usize,
    requests: usize,
    value_size: usize,
}

impl BenchArgs {
    fn from_args() -> Result<Option<Self>> {
        let mut args = BenchArgs {
            config: ClientConfig::default(),
            clients: 16,
            requests: 10_000,
            value_size: 64,
        };
        let mut host = None;
        let mut port = None;
        let mut pool_max = None;

        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| iter.next().with_context(|| format!("{flag} requires a value"));
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = value("--config")?;
                    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
                    args.config = ClientConfig::from_json(&raw)?;
                }
                "--host" | "-h" => host = Some(value("--host")?),
                "--port" | "-p" => port = Some(value("--port")?.parse::<u16>().context("invalid port")?),
                "--clients" => args.clients = value("--clients")?.parse().context("invalid client count")?,
                "--requests" | "-n" => args.requests = value("--requests")?.parse().context("invalid request count")?,
                "--size" => args.value_size = value("--size")?.parse().context("invalid value size")?,
                "--pool-max" => pool_max = Some(value("--pool-max")?.parse::<usize>().context("invalid pool size")?),
                "--help" => {
                    print_help();
                    return Ok(None);
                }
                other => bail!("unknown argument: {other}"),
            }
        }

        // Flags override whatever the config file said.
        if let Some(host) = host {
            args.config.host = host;
        }
        if let Some(port) = port {
            args.config.port = port;
        }
        if let Some(max) = pool_max {
            args.config.pool.max_objects = max;
            args.config.pool.min_objects = args.config.pool.min_objects.min(max.saturating_sub(1));
        }
        args.config.pool.validate()?;
        if args.clients == 0 {
            bail!("--clients must be positive");
        }
        Ok(Some(args))
    }
}

fn print_help() {
    println!(
        r#"
respool-bench - pooled Redis client load generator

USAGE:
    respool-bench [OPTIONS]

OPTIONS:
    -c, --config <FILE>      JSON client configuration
    -h, --host <HOST>        Server host (default: 127.0.0.1)
    -p, --port <PORT>        Server port (default: 6379)
        --clients <N>        Concurrent tasks (default: 16)
    -n, --requests <N>       SET/GET pairs in total (default: 10000)
        --size <BYTES>       Value size (default: 64)
        --pool-max <N>       Upper bound on pooled connections
        --help               Print this help message

Set RUST_LOG=respool_pool=debug to trace pool activity.
"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(args) = BenchArgs::from_args()? else {
        return Ok(());
    };

    let registry = PoolRegistry::new();
    RedisClient::register(&registry, POOL_KEY, args.config.clone())?;
    let client = RedisClient::from_registry(&registry, POOL_KEY)?;

    let warmed = client.warm_up().await?;
    info!(addr = %args.config.addr(), warmed, "pool ready");

    let value = "x".repeat(args.value_size);
    let per_client = args.requests.div_ceil(args.clients);
    let started = Instant::now();

    let mut tasks = Vec::with_capacity(args.clients);
    for id in 0..args.clients {
        let client = client.clone();
        let value = value.clone();
        tasks.push(tokio::spawn(async move { run_client(client, id, per_client, value).await }));
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    for task in tasks {
        let (ok, err) = task.await.context("bench task panicked")?;
        completed += ok;
        failed += err;
    }

    let elapsed = started.elapsed();
    report(completed, failed, elapsed);

    let stats = registry.stats();
    for (key, stats) in &stats {
        println!(
            "pool {key}: created={} in_use={} min={} max={}",
            stats.created, stats.in_use, stats.min, stats.max
        );
    }

    client.shutdown().await;
    Ok(())
}

async fn run_client(client: RedisClient, id: usize, rounds: usize, value: String) -> (usize, usize) {
    let mut ok = 0;
    let mut failed = 0;
    for round in 0..rounds {
        let key = format!("bench:{id}:{round}");
        let result = async {
            client.set(key.clone(), value.clone()).await?;
            client.get::<String>(key).await
        }
        .await;
        match result {
            Ok(Some(_)) => ok += 1,
            Ok(None) => failed += 1,
            Err(err) => {
                warn!(client = id, error = %err, "request failed");
                failed += 1;
                // Retrying cannot fix these.
                if matches!(&err, ClientError::Pool(pool) if !pool.is_recoverable()) {
                    break;
                }
            }
        }
    }
    (ok, failed)
}

fn report(completed: usize, failed: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    // Each round is two commands.
    let ops = (completed * 2) as f64 / secs;
    println!("completed {completed} rounds ({failed} failed) in {:.2?}", elapsed);
    println!("throughput: {ops:.0} ops/sec");
}
