//! Headless end-to-end demo.
//!
//! Runs the ticker on the wall clock, fires two bursts and a reset, and
//! renders into a backend that only counts uploads. Set `RUST_LOG=debug` for
//! per-tick output, or pass a JSON config path as the first argument.
//!
//! Run with: `cargo run -p bouncesync-server --example headless_demo`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use bouncesync_client::prelude::{ClientConfig, FeedConnection, RenderBackend, RenderSync};
use bouncesync_server::prelude::*;
use glam::Mat4;
use tracing::info;
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_millis(33);

#[derive(Default)]
struct CountingBackend {
    uploads: u64,
    last_drawn: usize,
}

impl RenderBackend for CountingBackend {
    fn upload_instances(&mut self, instances: &[Mat4]) {
        self.uploads += 1;
        self.last_drawn = instances.len();
    }
}

fn render_frames(
    frames: u32,
    conn: &mut FeedConnection,
    sync: &mut RenderSync,
    backend: &mut CountingBackend,
) {
    for _ in 0..frames {
        conn.pump(sync);
        sync.frame(backend);
        thread::sleep(FRAME);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => ServerConfig::default(),
    };
    let ctx = Arc::new(ServerContext::new(config)?);
    let ticker = Ticker::spawn(Arc::clone(&ctx), Arc::new(SystemClock::new()))
        .context("starting ticker thread")?;

    let mut conn = FeedConnection::new(ctx.subscribe());
    let mut sync = RenderSync::new(&ClientConfig::default());
    let mut backend = CountingBackend::default();

    ctx.spawn(0.0, 12.0, 0.0)?;
    ctx.spawn_burst()?;
    render_frames(30, &mut conn, &mut sync, &mut backend);
    ctx.spawn_burst()?;
    render_frames(30, &mut conn, &mut sync, &mut backend);
    info!(
        live = sync.live_count(),
        drawn = backend.last_drawn,
        uploads = backend.uploads,
        "before reset"
    );

    let removed = ctx.reset();
    render_frames(5, &mut conn, &mut sync, &mut backend);
    info!(removed, live = sync.live_count(), "after reset");

    let diagnostics = ticker.stop();
    let checksum = ctx.exclusive(|state| state.tables.checksum());
    info!(
        ticks = diagnostics.ticks_fired,
        late_steps = diagnostics.late_steps,
        max_backlog = diagnostics.max_backlog,
        events = conn.received(),
        stats = ?sync.stats(),
        checksum = %checksum.to_hex(),
        "demo finished"
    );
    Ok(())
}
