// =============================================================================
// FRAMECHAIN - GPU frame lifecycle and presentation synchronization
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Application (frame loop, GUI callback, FPS title)              │
// │    ├── Renderer (deferred / path tracer stubs)                  │
// │    └── FrameOrchestrator                                        │
// │          ├── FramePacer (slots, fences, out-of-date tracking)   │
// │          ├── Swapchain + render pass + framebuffers             │
// │          └── Device + surface + instance                        │
// │  WinitWindow (event pumping, resize flag, surface creation)     │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod app;
mod backend;
mod config;
mod context;
mod pacer;
mod platform;
mod renderer;

use anyhow::Result;
use app::Application;
use config::Config;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

fn main() -> Result<()> {
    // Load configuration from config.toml; reported once the logger exists
    let (config, source) = Config::load();

    init_logging(&config);
    log::info!("Starting framechain");
    source.report(&config);
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Present mode: {}", config.graphics.present_mode);
    log::info!("Renderer: {}", config.renderer.kind);

    platform::runtime::init();
    let result = run(&config);
    platform::runtime::terminate();

    if let Err(e) = &result {
        log::error!("Fatal error: {:#}", e);
    }
    result
}

fn run(config: &Config) -> Result<()> {
    let mut app = Application::new(config)?;

    app.set_gui_callback(|frame| {
        if frame.frame_index % 600 == 0 {
            log::debug!(
                "Frame {}: {:.3} ms, {:.1} FPS",
                frame.frame_index,
                frame.delta_seconds * 1000.0,
                frame.fps()
            );
        }
        Ok(())
    });

    app.run()
}

/// Writes every log line to stderr and the log file
struct LogTee {
    file: File,
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialize logging, optionally mirrored into a fresh log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    // RUST_LOG still wins over the config
    builder.parse_default_env();

    let mut file_error = None;
    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== framechain log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(LogTee { file })));
            }
            Err(e) => file_error = Some(e),
        }
    }

    builder.init();

    if let Some(e) = file_error {
        log::warn!("Could not open log file '{}': {}", config.debug.log_file, e);
    }
}
