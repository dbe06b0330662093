//! A small command-line driver over `sacn-core`: send a flat DMX level on
//! a universe, or listen to one and print what arrives. Exercises the
//! public [Source]/[Receiver] surface the same way an embedding
//! application would, without any showfile or fixture patching on top.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use sacn_core::cid::SourceName;
use sacn_core::lifecycle::{
    self, Feature, ReceiveRuntime, RuntimeNotification, SourceRuntime, spawn_receive_thread_with_timeout,
    spawn_source_thread_with_interval,
};
use sacn_core::net::{IpFamily, SocketPlane};
use sacn_core::prelude::*;
use sacn_core::source::universe::UniverseParams;

#[derive(Parser)]
#[command(name = "sacn-demo")]
#[command(about = "Send or receive sACN DMX data on a universe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transmit one flat DMX level across all 512 slots of a universe.
    Send {
        /// Universe to transmit on (1..=63999).
        universe: UniverseId,
        /// Universe priority, 0..=200.
        #[arg(long, default_value_t = 100)]
        priority: u8,
        /// The level to write into every slot.
        #[arg(long, default_value_t = 255)]
        level: u8,
        /// Source name advertised on the wire.
        #[arg(long, default_value = "sacn-demo")]
        name: String,
        /// How long to keep transmitting before terminating cleanly.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Listen on a universe and print notifications as they arrive.
    Receive {
        /// Universe to listen on (1..=63999).
        universe: UniverseId,
        /// How long to listen before shutting down.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let is_debug_mode = cfg!(debug_assertions);
    let default_level = if is_debug_mode { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    pretty_env_logger::formatted_builder().filter_level(default_level).parse_env("RUST_LOG").init();

    let cli = Cli::parse();
    let tokio_rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    tokio_rt.block_on(async move {
        match cli.command {
            Commands::Send { universe, priority, level, name, seconds } => {
                run_send(universe, priority, level, name, seconds).await
            }
            Commands::Receive { universe, seconds } => run_receive(universe, seconds).await,
        }
    })
}

async fn run_send(universe: UniverseId, priority: u8, level: u8, name: String, seconds: u64) -> anyhow::Result<()> {
    lifecycle::init(Feature::AllNetworking);

    let socket_plane = Arc::new(SocketPlane::new(BindPolicy::default())?);
    let interfaces = socket_plane.interfaces();
    socket_plane.join_universe(IpFamily::V4, universe, interfaces.interfaces())?;

    let cid = uuid::Uuid::new_v4();
    let mut source = Source::new(SourceConfig::new(cid, SourceName::new(&name)?));
    source.add_universe(universe, UniverseParams { priority, ..Default::default() })?;
    source.update_levels(universe, &[level; 512])?;

    let runtime = SourceRuntime::new(Arc::clone(&socket_plane));
    runtime.register_source(source)?;

    log::info!("transmitting universe {universe} at level {level} for {seconds}s (cid {cid})");
    let thread = spawn_source_thread_with_interval(Arc::clone(&runtime), sacn_core::config::DEFAULT_SOURCE_TICK_INTERVAL);
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    log::info!("terminating universe {universe}");
    runtime.begin_shutdown(cid)?;
    while !runtime.is_quiescent(cid) {
        tokio::time::sleep(sacn_core::config::DEFAULT_SOURCE_TICK_INTERVAL).await;
    }
    runtime.remove_source(cid);

    thread.shutdown();
    lifecycle::deinit(Feature::AllNetworking);
    Ok(())
}

async fn run_receive(universe: UniverseId, seconds: u64) -> anyhow::Result<()> {
    lifecycle::init(Feature::AllNetworking);

    let socket_plane = Arc::new(SocketPlane::new(BindPolicy::default())?);
    let interface_set = socket_plane.interfaces();
    let (socket_id, failed) = socket_plane.join_universe(IpFamily::V4, universe, interface_set.interfaces())?;
    if !failed.is_empty() {
        log::warn!("{} interface(s) failed to join universe {universe}", failed.len());
    }
    let interface_ids: Vec<_> = interface_set.interfaces().iter().map(|iface| iface.id).collect();

    let (runtime, notifications) = ReceiveRuntime::new(Arc::clone(&socket_plane));
    runtime.register_receiver(universe, ReceiverConfig::default(), &interface_ids, Instant::now())?;

    log::info!("listening on universe {universe} for {seconds}s");
    let thread = spawn_receive_thread_with_timeout(Arc::clone(&runtime), sacn_core::config::DEFAULT_T_READ);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        match notifications.recv_timeout(Duration::from_millis(200)) {
            Ok(RuntimeNotification::Receiver(notification)) => print_receiver_notification(notification),
            Ok(_) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    thread.shutdown();
    runtime.unregister(universe).ok();
    socket_plane.release_socket(socket_id);
    lifecycle::deinit(Feature::AllNetworking);
    Ok(())
}

fn print_receiver_notification(notification: ReceiverNotification) {
    match notification {
        ReceiverNotification::UniverseData { universe, source, levels, priority, sampling, .. } => {
            let preview_len = levels.len().min(8);
            println!(
                "[{universe}] universe-data from {} priority={priority} sampling={sampling} first-slots={:?}",
                source.name,
                &levels[..preview_len]
            );
        }
        ReceiverNotification::SourcesLost { universe, sources } => {
            for lost in sources {
                println!("[{universe}] source lost: {} (terminated={})", lost.name, lost.terminated);
            }
        }
        ReceiverNotification::SourcePapLost { universe, handle } => {
            println!("[{universe}] per-address priority lost for handle {handle}");
        }
        ReceiverNotification::SamplingPeriodEnded { universe } => {
            println!("[{universe}] sampling period ended");
        }
        ReceiverNotification::SourceLimitExceeded { universe } => {
            println!("[{universe}] source limit exceeded");
        }
        ReceiverNotification::PapData { .. } | ReceiverNotification::NonDmx { .. } => {}
    }
}
