//! Oxygen Chamber Monitoring Service entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use oxysrv::alarms::AlarmEngine;
use oxysrv::calibration::CalibrationEngine;
use oxysrv::config::ServiceConfig;
use oxysrv::model::Chamber;
use oxysrv::polling::PollingScheduler;
use oxysrv::protocol::{PlcTransport, RegisterService};
use oxysrv::publish::{EventPublisher, RedisPublisher};
use oxysrv::store::{MemoryStore, RecordStore};

#[derive(Debug, Parser)]
#[command(name = "oxysrv", about = "Oxygen chamber monitoring service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against simulated sensor data instead of the PLC
    #[arg(long)]
    demo: bool,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    let _log_guard =
        common::logging::init_logging(&config.logging).context("Failed to initialize logging")?;
    info!(
        "Starting oxysrv (PLC {}:{}, demo_mode={}, poll interval {} ms)",
        config.plc.host, config.plc.port, config.demo_mode, config.polling.interval_ms
    );

    let transport = PlcTransport::new(config.plc.host.clone(), config.plc.port);
    let registers = Arc::new(RegisterService::new(transport, config.demo_mode));

    let store = Arc::new(MemoryStore::new());
    if config.demo_mode {
        seed_demo_chambers(&store).await;
    }
    let store: Arc<dyn RecordStore> = store;

    let publisher: Arc<dyn EventPublisher> =
        Arc::new(RedisPublisher::new(config.redis.url.clone()));

    let calibration = Arc::new(CalibrationEngine::new(store.clone(), publisher.clone()));
    let alarms = Arc::new(AlarmEngine::new(
        store.clone(),
        registers.clone(),
        publisher.clone(),
    ));
    let scheduler = Arc::new(PollingScheduler::new(
        registers,
        calibration,
        alarms,
        store,
        publisher,
        config.polling.interval_ms,
    ));

    scheduler.start().await;

    common::shutdown::wait_for_shutdown().await;
    info!("Shutdown signal received");

    scheduler.stop().await;
    let stats = scheduler.stats();
    info!(
        "Final poll statistics: {} ok, {} failed ({:.1}% success)",
        stats.successful_cycles, stats.failed_cycles, stats.success_rate
    );
    Ok(())
}

/// Two chambers matching the demo sensor layout, so a hardware-less run
/// produces readings and alarms out of the box
async fn seed_demo_chambers(store: &MemoryStore) {
    for (id, sensor_index) in [(1, 0), (2, 1)] {
        store
            .insert_chamber(Chamber {
                id,
                name: format!("Chamber {id}"),
                active: true,
                sensor_index: Some(sensor_index),
                last_raw_value: None,
                alarm_level_high: 24.0,
                alarm_level_low: 16.0,
                calibration_required: false,
            })
            .await;
    }
    info!("Seeded demo chambers");
}
