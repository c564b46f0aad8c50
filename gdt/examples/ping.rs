//! Stateless echo, dialer side (spec.md §8 scenario 1): connects to a
//! `pong` daemon, registers, and sends one `SF_STATELESS` ServiceMessage
//! carrying a single CSTRING parameter. `pong`'s stream engine replies
//! with `SF_END` automatically; this side just waits for `STREAM_END` to
//! fire on the originating UUID.
//!
//! RUST_LOG=trace cargo run --example ping -- -i ping1 -c 127.0.0.1:5678

use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use gdt::{
    Client, EventArgs, EventDispatcher, EventKind, GdtArgs, HeartbeatConfig, ParameterId, PoolConfig,
    ServiceParamValue, ServiceParameter, Session, SessionConfig,
};
use tokio::sync::Notify;

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
    let peer = args
        .peers
        .first()
        .copied()
        .ok_or_else(|| anyhow!("ping needs at least one -c ip:port"))?;
    let remote = SocketAddr::new(IpAddr::V4(peer.0), peer.1);

    let done = Arc::new(Notify::new());
    let done_clone = done.clone();
    let mut events = EventDispatcher::new();
    events.on(
        EventKind::StreamEnd,
        Box::new(move |_, _| {
            done_clone.notify_one();
        }),
    );
    events.on(
        EventKind::ClientNew,
        Box::new(|_, _| log::info!("registered with pong")),
    );

    let config = SessionConfig::from_args("ping", &args);
    let session = Session::new(
        config,
        HeartbeatConfig::default(),
        PoolConfig::from_args(&args),
        Duration::from_secs(5),
        Arc::new(events),
    );

    log::info!("connecting to {remote}..");
    let client: Arc<Client> = session.connect(remote, args.streams, false).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !client.is_registered() {
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("registration handshake with {remote} timed out"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let destination = client
        .end_point()
        .ok_or_else(|| anyhow!("registered but end_point unset"))?;
    log::info!("registered, sending stateless ping to {:?}", destination);

    client
        .send_service_message(
            destination,
            47,
            0,
            vec![ServiceParameter::new(
                ParameterId::COMMAND_ID,
                0,
                ServiceParamValue::Cstring("ping".into()),
            )],
        )
        .await
        .map_err(|e| anyhow!("send_service_message failed: {e}"))?;

    let _ = tokio::time::timeout(Duration::from_secs(5), done.notified()).await;
    log::info!("stream complete, shutting down");

    client.shutdown(Duration::from_secs(1)).await;
    Ok(())
}
