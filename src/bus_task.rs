//! Bus thread: reactor-driven owner of the [`BusService`].
//!
//! Runs in a dedicated thread using `edge-executor` for cooperative
//! scheduling and `async-io-mini` for reactor timers.  Two futures share
//! the service through `Rc<RefCell<_>>`:
//!
//! 1. **Poll**: one arbiter step every 1ms via reactor timer
//! 2. **Command**: truly async via `commands.receive().await`
//!    (wakes as soon as the supervisor or a console sends a command)
//!
//! Synchronous queries never pass through here; the
//! [`QueryClient`](crate::clients::QueryClient) feeds the bridge directly
//! and the poll future picks the request up on its next step.
//!
//! ```text
//!  ┌────────────────────────────────────────────────────────┐
//!  │  Bus Thread                                            │
//!  │  ┌──────────────────────────────────────────────────┐  │
//!  │  │  futures_lite::block_on                          │  │
//!  │  │  ┌──────────────────────────────────────────────┐│  │
//!  │  │  │  edge_executor::LocalExecutor                ││  │
//!  │  │  │                                              ││  │
//!  │  │  │  ┌──────────────┐     ┌─────────────────┐    ││  │
//!  │  │  │  │ Poll         │     │ Command (async) │    ││  │
//!  │  │  │  │ 1ms ⏱        │     │ wake-on-send    │    ││  │
//!  │  │  │  └──────────────┘     └─────────────────┘    ││  │
//!  │  │  └──────────────────────────────────────────────┘│  │
//!  │  └──────────────────────────────────────────────────┘  │
//!  └────────────────────────────────────────────────────────┘
//! ```

use core::cell::RefCell;
use core::future::Future;
use core::time::Duration;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::app::commands::BusCommand;
use crate::app::ports::{Clock, EventSink, RecordStore, StreamSource, WallClock};
use crate::app::service::BusService;
use crate::bus::Transport;

/// Channel depth for inbound commands.
pub const COMMAND_DEPTH: usize = 8;

/// Interval between two arbiter steps.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub type CommandChannel = Channel<CriticalSectionRawMutex, BusCommand, COMMAND_DEPTH>;

/// Inbound command channel: any thread → bus thread.
pub static COMMAND_CHANNEL: CommandChannel = Channel::new();

/// Queue `cmd` for the bus thread.  Returns `false` if the channel is full.
pub fn send_command(cmd: BusCommand) -> bool {
    if COMMAND_CHANNEL.try_send(cmd).is_err() {
        warn!("BUS: command channel full, dropping command");
        return false;
    }
    true
}

// ── Async tasks ──────────────────────────────────────────────

type Shared<T, S, R, W> = Rc<RefCell<BusService<T, S, R, W>>>;

async fn poll_loop<T, S, R, W, C, E>(service: Shared<T, S, R, W>, clock: C, mut sink: E)
where
    T: Transport,
    S: StreamSource,
    R: RecordStore,
    W: WallClock,
    C: Clock,
    E: EventSink,
{
    loop {
        service.borrow_mut().poll(clock.now_ms(), &mut sink);
        async_io_mini::Timer::after(POLL_INTERVAL).await;
    }
}

async fn command_loop<T, S, R, W>(service: Shared<T, S, R, W>, commands: &CommandChannel)
where
    T: Transport,
    S: StreamSource,
    R: RecordStore,
    W: WallClock,
{
    loop {
        let cmd = commands.receive().await;
        if let Err(e) = service.borrow_mut().handle_command(cmd) {
            warn!("BUS: command rejected: {}", e);
        }
    }
}

/// Drive `service` on the current thread until `until` resolves.
///
/// Commands are taken from `commands`; every event goes to `sink`.
pub fn run_bus_loop<T, S, R, W, C, E>(
    service: BusService<T, S, R, W>,
    clock: C,
    sink: E,
    commands: &CommandChannel,
    until: impl Future<Output = ()>,
) where
    T: Transport,
    S: StreamSource,
    R: RecordStore,
    W: WallClock,
    C: Clock,
    E: EventSink,
{
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
    let service = Rc::new(RefCell::new(service));

    executor
        .spawn(poll_loop(service.clone(), clock, sink))
        .detach();
    executor.spawn(command_loop(service, commands)).detach();

    info!("BUS task started (poll every {:?})", POLL_INTERVAL);
    futures_lite::future::block_on(executor.run(until));
    info!("BUS task stopped");
}

// ── Thread spawn ─────────────────────────────────────────────

/// Spawn the bus thread on the application core.
///
/// The thread runs forever, fed by [`COMMAND_CHANNEL`].
pub fn spawn<T, S, R, W, C, E>(
    service: BusService<T, S, R, W>,
    clock: C,
    sink: E,
) -> std::io::Result<std::thread::JoinHandle<()>>
where
    T: Transport + Send + 'static,
    S: StreamSource + Send + 'static,
    S::Stream: Send,
    R: RecordStore + Send + 'static,
    W: WallClock + Send + 'static,
    C: Clock + Send + 'static,
    E: EventSink + Send + 'static,
{
    pin_next_thread();
    std::thread::Builder::new()
        .name("bus".into())
        .stack_size(BUS_STACK_KB * 1024)
        .spawn(move || {
            run_bus_loop(
                service,
                clock,
                sink,
                &COMMAND_CHANNEL,
                core::future::pending::<()>(),
            );
        })
}

const BUS_STACK_KB: usize = 12;

/// Pin the next `std::thread` spawned from this thread to APP_CPU.
///
/// `esp_pthread_set_cfg()` is thread-local and applies to the next
/// `pthread_create()` only.
#[cfg(target_os = "espidf")]
fn pin_next_thread() {
    const APP_CPU: i32 = 1;
    const PRIORITY: i32 = 10;
    let ret = unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = APP_CPU;
        cfg.prio = PRIORITY;
        cfg.stack_size = (BUS_STACK_KB * 1024) as i32;
        cfg.thread_name = c"bus".as_ptr();
        esp_idf_sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_sys::ESP_OK as i32 {
        warn!("BUS: esp_pthread_set_cfg failed ({}), thread not pinned", ret);
    }
}

#[cfg(not(target_os = "espidf"))]
fn pin_next_thread() {}
