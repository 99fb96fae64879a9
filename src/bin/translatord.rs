//! The translator service: subscribes to the BDCL/SCL bus, runs every
//! message through the translator core, forwards the resulting patches to
//! the DCM patch websockets and pushes closed history chunks to the
//! history store.
//!
//! Delivery is best-effort: a failing websocket is dropped and reconnected
//! on a 1 s cadence, losing that collection's patches in the meantime, and
//! the outbound queue drops patches above its high-water mark instead of
//! growing without bound during a DCM outage.

use std::collections::HashMap;
use std::io::Write;
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use redis::AsyncCommands;
use structopt::StructOpt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use lolan_translator::{Collection, HistoryChunk, Patch, Translator};

type WsSink = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "Translates BDCL/SCL bus telemetry into DCM attribute patches and history chunks."
)]
struct Opt {
    /// Redis URL of the data-collection bus.
    #[structopt(long = "--bus-url", default_value = "redis://bdcl")]
    bus_url: String,

    /// DCM patch websocket URL format; '{}' is replaced by the collection.
    #[structopt(long = "--dcm-url", default_value = "ws://dcm/v2/{}/patchwebsocket")]
    dcm_url: String,

    /// Channel pattern covering both bus sources.
    #[structopt(long = "--pattern", default_value = "451513e9-da18-4c35-863c-877bac28386*")]
    pattern: String,

    /// Exact channel the positioning service publishes on.
    #[structopt(
        long = "--scl-channel",
        default_value = "451513e9-da18-4c35-863c-877bac283863"
    )]
    scl_channel: String,

    /// Outbound queue high-water mark; patches beyond it are dropped.
    #[structopt(long = "--queue-limit", default_value = "4096")]
    queue_limit: usize,
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn init_logging() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {} {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f_UTC"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn patch_url(format: &str, coll: Collection) -> String {
    format.replace("{}", coll.as_str())
}

fn wallclock_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

#[tokio::main]
async fn run() -> Result<()> {
    let opt = Opt::from_args();

    let client = redis::Client::open(opt.bus_url.as_str()).context("invalid bus URL")?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("cannot connect to the bus")?;
    pubsub
        .psubscribe(&opt.pattern)
        .await
        .context("cannot subscribe to the bus pattern")?;
    let mut history = client
        .get_multiplexed_async_connection()
        .await
        .context("cannot open the history connection")?;

    let mut sinks: HashMap<Collection, WsSink> = HashMap::new();
    for coll in Collection::ALL.iter() {
        let url = patch_url(&opt.dcm_url, *coll);
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                sinks.insert(*coll, ws);
            }
            Err(e) => error!("cannot connect to websocket '{}': {}", url, e),
        }
    }
    if sinks.is_empty() {
        error!("cannot connect to any websockets at all");
        bail!("no patch websockets available");
    }

    info!("loop starting...");

    let (patch_tx, patch_rx) = mpsc::channel::<Patch>(opt.queue_limit);
    let (sink_tx, sink_rx) = mpsc::unbounded_channel::<(Collection, WsSink)>();
    let sender = tokio::spawn(send_loop(
        sinks,
        patch_rx,
        sink_rx,
        sink_tx,
        opt.dcm_url.clone(),
    ));

    let mut translator = Translator::new();
    let mut dropped: u64 = 0;
    {
        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
                message = messages.next() => {
                    let message = match message {
                        Some(m) => m,
                        None => break,
                    };
                    handle_message(
                        &mut translator,
                        &opt,
                        message,
                        &patch_tx,
                        &mut history,
                        &mut dropped,
                    )
                    .await;
                }
            }
        }
    }

    pubsub.punsubscribe(&opt.pattern).await.ok();
    drop(patch_tx);
    sender.await.ok();
    Ok(())
}

async fn handle_message(
    translator: &mut Translator,
    opt: &Opt,
    message: redis::Msg,
    patches: &mpsc::Sender<Patch>,
    history: &mut redis::aio::MultiplexedConnection,
    dropped: &mut u64,
) {
    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("unreadable payload from the bus: {}", e);
            return;
        }
    };

    if message.get_channel_name() == opt.scl_channel {
        match translator.process_scl(&payload) {
            Ok(patch) => enqueue(patch, patches, dropped),
            Err(e) => warn!("not a valid json from SCL: {}", e),
        }
    } else {
        match translator.process_bdcl(&payload, wallclock_now()) {
            Ok(output) => {
                for patch in output.patches {
                    enqueue(patch, patches, dropped);
                }
                for chunk in output.chunks {
                    write_history(history, chunk).await;
                }
            }
            Err(e) => warn!("not a valid json from BDCL: {}", e),
        }
    }
}

fn enqueue(patch: Patch, patches: &mpsc::Sender<Patch>, dropped: &mut u64) {
    match patches.try_send(patch) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(patch)) => {
            *dropped += 1;
            if *dropped == 1 || *dropped % 1000 == 0 {
                warn!(
                    "outbound queue full, dropping patch for '{}' ({} dropped so far)",
                    patch.coll, dropped
                );
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

async fn write_history(conn: &mut redis::aio::MultiplexedConnection, chunk: HistoryChunk) {
    let body = match serde_json::to_string(&chunk.groups) {
        Ok(body) => body,
        Err(e) => {
            error!("cannot serialize history chunk for field '{}': {}", chunk.field, e);
            return;
        }
    };
    let result: redis::RedisResult<()> = conn.rpush(chunk.field, body).await;
    match result {
        Ok(()) => debug!("history chunk written for field '{}'", chunk.field),
        Err(e) => error!("cannot write history chunk for field '{}': {}", chunk.field, e),
    }
}

async fn send_loop(
    mut sinks: HashMap<Collection, WsSink>,
    mut patches: mpsc::Receiver<Patch>,
    mut reconnected: mpsc::UnboundedReceiver<(Collection, WsSink)>,
    reconnect_tx: mpsc::UnboundedSender<(Collection, WsSink)>,
    dcm_url: String,
) {
    loop {
        tokio::select! {
            Some((coll, ws)) = reconnected.recv() => {
                sinks.insert(coll, ws);
            }
            patch = patches.recv() => {
                let patch = match patch {
                    Some(patch) => patch,
                    None => break,
                };
                let coll = patch.coll;
                match sinks.get_mut(&coll) {
                    Some(ws) => {
                        let body = patch.to_message();
                        match ws.send(Message::Text(body.clone())).await {
                            Ok(()) => info!("data sent to websocket '{}': {}", coll, body),
                            Err(e) => {
                                error!(
                                    "cannot send to websocket of collection '{}', will be removed from list now: {}",
                                    coll, e
                                );
                                sinks.remove(&coll);
                                tokio::spawn(reconnect(
                                    coll,
                                    patch_url(&dcm_url, coll),
                                    reconnect_tx.clone(),
                                ));
                            }
                        }
                    }
                    None => warn!("websocket for collection '{}' is not available", coll),
                }
            }
        }
    }

    for (_, mut ws) in sinks {
        let _ = ws.close(None).await;
    }
}

async fn reconnect(
    coll: Collection,
    url: String,
    tx: mpsc::UnboundedSender<(Collection, WsSink)>,
) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        warn!("trying to reconnect to websocket '{}' ...", url);
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!("successfully reconnected to websocket '{}'", url);
                let _ = tx.send((coll, ws));
                return;
            }
            Err(e) => error!("cannot reconnect to websocket '{}': {}", url, e),
        }
    }
}
