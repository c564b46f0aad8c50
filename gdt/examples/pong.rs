//! Stateless echo, listener side (spec.md §8 scenario 1): accepts
//! associations, completes the registration handshake, and logs every
//! `SRVC_MSG_COMPLETE` it assembles. The reply itself needs no
//! application code — `client::process_task` answers every
//! `SF_STATELESS` packet with an automatic `SF_END` once its stream
//! engine and ServiceMessage reassembly both finish with it.
//!
//! RUST_LOG=trace cargo run --example pong -- -i pong1 -p 5678

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use gdt::{EventArgs, EventDispatcher, EventKind, GdtArgs, HeartbeatConfig, PoolConfig, Session, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();

    let args = GdtArgs::parse_or_exit();

    let mut events = EventDispatcher::new();
    events.on(
        EventKind::ClientNew,
        Box::new(|_, args| {
            if let EventArgs::Client(client) = args {
                log::info!("client {:?} registered ({:?})", client.id, client.end_point());
            }
        }),
    );
    events.on(
        EventKind::ServiceMessageComplete,
        Box::new(|_, args| {
            if let EventArgs::ServiceMessage(msg) = args {
                log::info!(
                    "service message complete: service_id={} action={} params={}",
                    msg.service_id,
                    msg.service_action,
                    msg.parameters.len()
                );
                for p in &msg.parameters {
                    log::info!("  param {:?}[{}] = {:?}", p.id, p.index, p.value);
                }
            }
        }),
    );
    events.on(
        EventKind::ClientTerminated,
        Box::new(|_, _| log::info!("client terminated")),
    );

    let config = SessionConfig::from_args("pong", &args);
    let session = Session::new(
        config,
        HeartbeatConfig::default(),
        PoolConfig::from_args(&args),
        Duration::from_secs(5),
        Arc::new(events),
    );

    let local_addr = session.listen().await?;
    log::info!("listening on {local_addr}");

    tokio::signal::ctrl_c().await?;
    session.stop_server(Duration::from_secs(1)).await;
    Ok(())
}
