//! Pipelined load and smoke checks against a live RESP server.

use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use respline_client::{ClientConfig, Command, Reply, Session};
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "respline-bench")]
#[command(about = "Pipelined load and smoke checks for a RESP server")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// SET a counter to 0, pipeline INCR against it, then GET it back.
    Incr {
        /// Server address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:6379")]
        addr: String,

        /// Number of INCR requests to pipeline
        #[arg(short, long, default_value = "100000")]
        count: u64,

        /// Counter key
        #[arg(short, long, default_value = "c")]
        key: String,
    },
    /// Push two values onto a list and print the list.
    Demo {
        /// Server address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:6379")]
        addr: String,

        /// List key
        #[arg(short, long, default_value = "l")]
        key: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();

    match Args::parse().mode {
        Mode::Incr { addr, count, key } => incr(addr, count, key).await,
        Mode::Demo { addr, key } => demo(addr, key).await,
    }
}

async fn incr(addr: String, count: u64, key: String) -> Result<()> {
    let mut session = Session::with_config(ClientConfig::new(addr.clone()));
    let started = Instant::now();

    session.send(Command::new("SET").arg(key.as_str()).arg(0))?;
    for _ in 0..count {
        session.send(Command::new("INCR").arg(key.as_str()))?;
    }

    let (done_tx, done_rx) = oneshot::channel();
    session.fetch(Command::new("GET").arg(key.as_str()), move |result| {
        let elapsed = started.elapsed();
        match &result {
            Ok(reply) => println!("GET {} -> {} in {:?}", key, reply, elapsed),
            Err(err) => println!("GET {} failed after {:?}: {}", key, elapsed, err),
        }
        let _ = done_tx.send((result, elapsed));
    })?;

    let (result, elapsed) = done_rx.await.context("session closed before GET")?;
    let value = match result? {
        Reply::BulkString(Some(data)) => String::from_utf8_lossy(&data).parse::<u64>().ok(),
        _ => None,
    };
    info!(
        addr = %addr,
        requests = count,
        elapsed_ms = elapsed.as_millis() as u64,
        ops_per_sec = (count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)) as u64,
        "incr finished"
    );

    session.close();
    session.closed().await;
    if value != Some(count) {
        bail!("counter ended at {:?}, expected {}", value, count);
    }
    Ok(())
}

async fn demo(addr: String, key: String) -> Result<()> {
    let mut session = Session::with_config(ClientConfig::new(addr));

    for value in [1, 2] {
        let reply = session
            .call(Command::new("LPUSH").arg(key.as_str()).arg(value))
            .await?;
        println!("LPUSH {} {} -> {}", key, value, reply);
    }
    let reply = session
        .call(Command::new("LRANGE").arg(key.as_str()).arg(0).arg(-1))
        .await?;
    println!("LRANGE {} 0 -1 -> {}", key, reply);

    session.close();
    session.closed().await;
    Ok(())
}
