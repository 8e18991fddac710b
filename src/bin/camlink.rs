// camlink command line: still capture, live streaming, config scaffolding.

use anyhow::{Context, Result};
use camlink::{AdapterConfig, CameraAdapter, LogPhaseSink};
use std::env;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;

fn main() -> Result<()> {
    camlink::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: camlink <command> [args]");
        eprintln!("Commands:");
        eprintln!("  still  [--output <path>] [--config <path>]");
        eprintln!("  stream [--frames <n>] [--config <path>]");
        eprintln!("  init-config [--path <path>]");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "still" => cmd_still(&args),
        "stream" => cmd_stream(&args),
        "init-config" => cmd_init_config(&args),
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(1);
        }
    }
}

fn load_config(args: &[String]) -> Result<AdapterConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => AdapterConfig::load_from_file(path)?,
        None => AdapterConfig::load_from_file(AdapterConfig::default_path())?,
    };
    config.apply_env_overrides();
    if let Err(msg) = config.validate() {
        anyhow::bail!("invalid configuration: {}", msg);
    }
    Ok(config)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1))
}

fn cmd_still(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let output = flag_value(args, "--output")
        .map(String::as_str)
        .unwrap_or("still.jpg");

    let adapter = CameraAdapter::from_config(&config, Arc::new(LogPhaseSink))?;
    println!("📷 Opening {}", adapter.describe_transport());
    adapter.open()?;

    let frame = adapter.capture_still()?;
    fs::write(output, &frame.data)
        .with_context(|| format!("failed to write {}", output))?;
    println!("✅ Saved {} bytes ({}) to {}", frame.len(), frame.format, output);

    adapter.close();
    Ok(())
}

fn cmd_stream(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let max_frames: u64 = match flag_value(args, "--frames") {
        Some(n) => n.parse().context("--frames expects a number")?,
        None => 0,
    };

    let adapter = CameraAdapter::from_config(&config, Arc::new(LogPhaseSink))?;
    println!("📷 Opening {}", adapter.describe_transport());
    adapter.open()?;
    adapter.start_phase_reporting()?;
    adapter.start_stream()?;
    let (session, mut rx) = adapter.attach_stream_consumer()?;
    println!("🎥 Streaming as consumer {} (Ctrl-C to stop)", session);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let mut received = 0u64;
    while running.load(Ordering::SeqCst) && (max_frames == 0 || received < max_frames) {
        match rx.try_recv() {
            Ok(frame) => {
                received += 1;
                println!(
                    "📸 frame {} ({} bytes, {})",
                    frame.seq,
                    frame.len(),
                    frame.format
                );
            }
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(10)),
            Err(TryRecvError::Disconnected) => {
                eprintln!("❌ Stream ended");
                break;
            }
        }
    }

    adapter.detach_stream_consumer(session);
    adapter.stop_stream();
    println!(
        "🛑 Stopped after {} frames\n{}",
        received,
        serde_json::to_string_pretty(&adapter.stats())?
    );
    adapter.shutdown();
    Ok(())
}

fn cmd_init_config(args: &[String]) -> Result<()> {
    let path = flag_value(args, "--path")
        .map(String::as_str)
        .unwrap_or("camlink.toml");
    let config = AdapterConfig::default();
    config.save_to_file(path)?;
    println!("✅ Wrote default configuration to {}", path);
    Ok(())
}
