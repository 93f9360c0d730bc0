//! xframe-probe
//!
//! Opens a display, reports what the connection found out about the server
//! and window manager, shows one frame and routes its events until
//! interrupted. With `--json` every routed event is printed as one JSON line.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xframe::error::ServerError;
use xframe::selection::NoSelections;
use xframe::x11_async::ConnectionReadiness;
use xframe::{
    BufferFlipScheduler, Config, ConnectionHandle, DisplayRegistry, EventOutcome, EventRouter, FrameGeometry,
    FrameId, FrameSet,
};

struct Args {
    json: bool,
    display: Option<String>,
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args {
            json: false,
            display: None,
            config: None,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--json" => args.json = true,
                "--display" | "-d" => args.display = Some(iter.next().context("--display needs a value")?),
                "--config" | "-c" => args.config = Some(iter.next().context("--config needs a value")?.into()),
                other => anyhow::bail!("unknown argument {:?}", other),
            }
        }
        Ok(args)
    }
}

struct Probe {
    registry: DisplayRegistry,
    frames: FrameSet,
    router: EventRouter,
    flips: BufferFlipScheduler,
    handle: ConnectionHandle,
    frame: Option<FrameId>,
    readiness: ConnectionReadiness,
    json: bool,
}

/// Why the event loop stopped
enum Exit {
    Closed,
    ConnectionLost,
}

impl Probe {
    fn open(args: &Args, config: &Config) -> Result<Self> {
        let name = args.display.as_deref().or(config.display.name.as_deref());
        let mut registry = DisplayRegistry::new();
        let handle = registry.open(name, config).context("Failed to open display")?;
        let conn = registry
            .find_by_handle_mut(handle)
            .context("Display vanished from registry")?;

        let screen = conn.screen();
        info!(
            "Screen {}: {}x{} px, root 0x{:x}",
            screen.number, screen.width_px, screen.height_px, screen.root
        );
        let (xres, yres) = conn.resolution();
        info!(
            "Visual 0x{:x} ({:?}, depth {}), {:.1}x{:.1} dpi",
            conn.visual().id,
            conn.visual().class,
            conn.visual().depth,
            xres,
            yres
        );
        info!("Extensions: {:?}", conn.extensions());
        info!("Modifiers: {:?}", conn.modifiers());

        let hints = [
            ("_NET_WM_STATE", conn.atoms().net_wm_state),
            ("_NET_ACTIVE_WINDOW", conn.atoms().net_active_window),
            ("_NET_FRAME_EXTENTS", conn.atoms().net_frame_extents),
            ("_NET_WM_STATE_FULLSCREEN", conn.atoms().net_wm_state_fullscreen),
        ];
        for (label, atom) in hints {
            match conn.supports(atom) {
                Ok(supported) => info!("Window manager supports {}: {}", label, supported),
                Err(e) => warn!("Failed to query window manager support: {}", e),
            }
        }

        let mut frames = FrameSet::new();
        let geometry = FrameGeometry {
            x: 0,
            y: 0,
            width: 320,
            height: 200,
        };
        let frame = frames.realize(conn, geometry, None).context("Failed to realize frame")?;
        if let Some(surface) = frames.get(frame) {
            surface.map(conn)?;
            info!("Frame {} realized as window 0x{:x}", frame.0, surface.window());
        }
        conn.flush()?;

        let readiness = ConnectionReadiness::watch(handle)?;

        Ok(Self {
            registry,
            frames,
            router: EventRouter::new(),
            flips: BufferFlipScheduler::new(),
            handle,
            frame: Some(frame),
            readiness,
            json: args.json,
        })
    }

    /// Route everything queued on the connection, then flip dirty frames.
    fn process_batch(&mut self) -> Result<Option<Exit>> {
        let Some(conn) = self.registry.find_by_handle_mut(self.handle) else {
            return Ok(Some(Exit::ConnectionLost));
        };

        let mut routed = 0;
        loop {
            let event = match conn.server().poll_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(ServerError::ConnectionLost(reason)) => {
                    error!("Display connection lost: {}", reason);
                    self.registry.connection_lost(self.handle, &mut self.frames);
                    self.router.selections.forget_connection(self.handle);
                    self.frame = None;
                    return Ok(Some(Exit::ConnectionLost));
                }
                Err(e) => {
                    warn!("Failed to read event: {}", e);
                    break;
                }
            };
            routed += 1;

            let outcome = self.router.route(conn, &mut self.frames, event, &mut NoSelections);
            if outcome == EventOutcome::Ignored {
                continue;
            }
            if self.json {
                println!("{}", serde_json::to_string(&outcome)?);
            } else {
                info!("{:?}", outcome);
            }

            match outcome {
                EventOutcome::DeleteWindow { frame } => {
                    info!("Frame {} closed by the window manager", frame.0);
                    self.flips.forget(frame);
                    self.router.selections.forget_frame(frame);
                    self.frames.destroy(conn, frame)?;
                    if self.frame == Some(frame) {
                        self.frame = None;
                        return Ok(Some(Exit::Closed));
                    }
                }
                EventOutcome::Resized { frame, .. } => {
                    // Redraw into the back buffer so the next flip has content.
                    if let Some(surface) = self.frames.get_mut(frame) {
                        surface.drawable_for_write();
                    }
                }
                _ => {}
            }
        }

        let flipped = self.flips.flip_pending(conn, &mut self.frames)?;
        for err in conn.take_untrapped_errors() {
            warn!("Unhandled protocol error: {:?}", err);
        }
        if routed > 0 {
            debug!("Routed {} event(s), flipped {} frame(s)", routed, flipped);
        }
        conn.flush()?;
        Ok(None)
    }

    async fn run(&mut self, shutdown: &mut tokio::sync::mpsc::Receiver<()>) -> Result<Exit> {
        info!("Routing events");
        loop {
            if let Some(exit) = self.process_batch()? {
                return Ok(exit);
            }
            tokio::select! {
                () = self.readiness.wait_readable() => {}
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, cleaning up...");
                    return Ok(Exit::Closed);
                }
            }
        }
    }

    fn close(mut self) -> Result<()> {
        if let Some(conn) = self.registry.find_by_handle_mut(self.handle) {
            if let Some(frame) = self.frame.take() {
                self.frames.destroy(conn, frame)?;
            }
            conn.flush()?;
        }
        if self.registry.find_by_handle(self.handle).is_some() {
            self.registry.close(self.handle)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting xframe-probe");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    let _ = tx.send(()).await;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    let _ = tx.send(()).await;
                }
            }
        });
    }

    let mut probe = Probe::open(&args, &config)?;
    match probe.run(&mut shutdown_rx).await {
        Ok(Exit::Closed) => probe.close()?,
        Ok(Exit::ConnectionLost) => info!("Display went away, exiting"),
        Err(e) => {
            error!("Probe error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
