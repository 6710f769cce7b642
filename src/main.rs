//! Bus master firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  UartTransport    FileStreamSource   RingRecordStore           │
//! │  (Transport)      (StreamSource)     (RecordStore)             │
//! │  SystemClock      LogEventSink                                 │
//! │  (Clock+Wall)     (EventSink)                                  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              BusService (pure logic)                   │    │
//! │  │  Arbiter · Query · Time · Transfer ×2 · LogPoll        │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  bus thread (APP_CPU) · QueryClient callers (any thread)       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, PinDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{UartDriver, config::Config as UartConfig};
use esp_idf_svc::hal::units::Hertz;
use log::{info, warn};

use busmaster::adapters::file_stream::FileStreamSource;
use busmaster::adapters::log_sink::LogEventSink;
use busmaster::adapters::memory::RingRecordStore;
use busmaster::adapters::time::SystemClock;
use busmaster::adapters::uart::UartTransport;
use busmaster::app::commands::BusCommand;
use busmaster::app::service::BusService;
use busmaster::bus::Rs485Port;
use busmaster::bus_task;
use busmaster::clients::QueryCommand;
use busmaster::config::BusConfig;
use busmaster::pins;

const STORAGE_MOUNT: &core::ffi::CStr = c"/storage";
const CONFIG_PATH: &str = "/storage/busmaster.json";
const ARTIFACT_DIR: &str = "/storage/artifacts";

/// Device log records kept in RAM between uploads.
const LOG_CAPACITY: usize = 256;

// ── Storage ───────────────────────────────────────────────────

fn mount_storage() -> Result<()> {
    let conf = esp_idf_svc::sys::esp_vfs_spiffs_conf_t {
        base_path: STORAGE_MOUNT.as_ptr(),
        partition_label: core::ptr::null(),
        max_files: 4,
        format_if_mount_failed: false,
    };
    let ret = unsafe { esp_idf_svc::sys::esp_vfs_spiffs_register(&conf) };
    esp_idf_svc::sys::esp!(ret).context("mounting SPIFFS")?;
    Ok(())
}

fn load_config() -> BusConfig {
    let json = match std::fs::read_to_string(CONFIG_PATH) {
        Ok(json) => json,
        Err(e) => {
            warn!("{} unreadable ({}), using defaults", CONFIG_PATH, e);
            return BusConfig::default();
        }
    };
    match BusConfig::from_json(&json) {
        Ok(config) => config,
        Err(e) => {
            warn!("{} rejected ({}), using defaults", CONFIG_PATH, e);
            BusConfig::default()
        }
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Bus master v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Storage and configuration ──────────────────────────
    let config = match mount_storage() {
        Ok(()) => load_config(),
        Err(e) => {
            warn!("storage unavailable ({:#}), running with defaults", e);
            BusConfig::default()
        }
    };

    // ── 3. RS-485 transport ───────────────────────────────────
    let peripherals = Peripherals::take()?;
    let uart_config = UartConfig::new().baudrate(Hertz(config.baud_rate));
    // SAFETY: pin numbers come from the board map and are not claimed
    // anywhere else.
    let (tx, rx, de) = unsafe {
        (
            AnyIOPin::new(pins::BUS_TX_GPIO),
            AnyIOPin::new(pins::BUS_RX_GPIO),
            AnyOutputPin::new(pins::BUS_DE_GPIO),
        )
    };
    let uart = UartDriver::new(
        peripherals.uart1,
        tx,
        rx,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )
    .context("UART init")?;
    let de = PinDriver::output(de).context("driver-enable pin")?;
    let port = Rs485Port::new(UartTransport::new(uart), de);
    info!(
        "bus: UART{} @ {} baud, TX={} RX={} DE={}",
        pins::BUS_UART_NUM,
        config.baud_rate,
        pins::BUS_TX_GPIO,
        pins::BUS_RX_GPIO,
        pins::BUS_DE_GPIO
    );

    // ── 4. Bus service ────────────────────────────────────────
    let (service, query) = BusService::new(
        port,
        FileStreamSource::new(ARTIFACT_DIR),
        RingRecordStore::<LOG_CAPACITY>::new(),
        SystemClock::new(),
        &config,
    )
    .map_err(|e| anyhow::anyhow!("bus service: {e}"))?;
    let status = service.status();
    let bus = bus_task::spawn(service, SystemClock::new(), LogEventSink::new())
        .context("spawning bus thread")?;

    if !config.roster.is_empty() {
        bus_task::send_command(BusCommand::StartPolling);
    }

    // ── 5. Supervisor loop ────────────────────────────────────
    //
    // Queries the first roster device once a minute so a dead bus shows
    // up in the log even when nothing else is scheduled.
    let mut reply = [0u8; 32];
    loop {
        std::thread::sleep(core::time::Duration::from_secs(60));
        if bus.is_finished() {
            anyhow::bail!("bus thread exited");
        }
        let snap = status.snapshot();
        info!(
            "status: {:?} sent={} timeouts={} faults={} logs={} cycles={}",
            snap.bus_state,
            snap.frames_sent,
            snap.timeouts,
            snap.faults,
            snap.stored_logs,
            snap.poll_cycles
        );
        if let Some(&device) = config.roster.first() {
            if !query.query_blocking(device, &QueryCommand::Status, &mut reply) {
                warn!("status check of {:#06x} failed", device);
            }
        }
    }
}
