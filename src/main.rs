mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use hidwatch::protocol::{self, Direction};
use hidwatch::{HidEvent, HidServices, HidServicesConfig, HidServicesListener, ScanModeKind};
use tracing::info;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => HidServicesConfig::load(path)?,
        None => HidServicesConfig::default(),
    };
    config.log_traffic |= cli.monitor;

    match cli.command {
        Commands::List { vid, pid } => list(config, vid, pid),
        Commands::Watch { interval, read } => watch(config, interval, read),
        Commands::Info {
            vid,
            pid,
            serial,
            feature,
        } => device_info(config, vid, pid, serial.as_deref(), feature),
    }
}

fn list(config: HidServicesConfig, vid: u16, pid: u16) -> Result<()> {
    let services = HidServices::with_config(config.with_auto_start(false))?;
    services.scan()?;

    let devices: Vec<_> = services
        .attached_devices()
        .into_iter()
        .filter(|d| d.is_vid_pid_serial_match(vid, pid, None))
        .collect();
    println!("{} device(s)", devices.len());
    for device in &devices {
        println!("  {device}");
    }
    Ok(())
}

fn print_event(event: &HidEvent) {
    match event {
        HidEvent::Attached(device) => println!("+ {device}"),
        HidEvent::Detached(device) => println!("- {device}"),
        HidEvent::Failure(Some(device)) => println!("! {} failed", device.path),
        HidEvent::Failure(None) => println!("! enumeration failed"),
        HidEvent::DataReceived { device, data } => {
            println!("{} {}", device.path, protocol::format_traffic(Direction::In, data))
        }
    }
}

fn watch(mut config: HidServicesConfig, interval: Option<u64>, read: bool) -> Result<()> {
    if let Some(ms) = interval {
        config.set_scan_interval_ms(i64::try_from(ms)?)?;
    }
    if config.scan_mode == ScanModeKind::NoScan {
        config.scan_mode = ScanModeKind::FixedInterval;
    }
    let auto_read = config.auto_data_read || read;
    let services = Arc::new(HidServices::with_config(
        config.with_auto_start(false).with_auto_data_read(auto_read),
    )?);

    let weak = Arc::downgrade(&services);
    let listener: Arc<dyn HidServicesListener> = Arc::new(move |event: &HidEvent| {
        print_event(event);
        if !read {
            return;
        }
        if let (HidEvent::Attached(device), Some(services)) = (event, weak.upgrade()) {
            services.get_device_by_path(&device.path);
        }
    });
    services.add_listener(listener);

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })?;

    services.start()?;
    info!("Watching for devices ({:?})", services.scan_mode());
    while running.load(Ordering::SeqCst) && services.is_scanning() {
        thread::sleep(Duration::from_millis(100));
    }

    services.shutdown();
    Ok(())
}

fn device_info(
    config: HidServicesConfig,
    vid: u16,
    pid: u16,
    serial: Option<&str>,
    feature: Option<u8>,
) -> Result<()> {
    let services =
        HidServices::with_config(config.with_auto_start(false).with_auto_data_read(false))?;
    services.scan()?;

    let Some(device) = services.get_device(vid, pid, serial) else {
        bail!("No device matching {vid:04X}:{pid:04X}");
    };
    if !device.is_open() {
        bail!("Failed to open {}", device.path());
    }

    println!("{}", device.descriptor());
    for index in 1..=3 {
        if let Some(s) = device.indexed_string(index)? {
            println!("  string[{index}]: {s}");
        }
    }
    if let Some(report_id) = feature {
        let payload = device.get_feature_report(report_id)?;
        println!(
            "  feature[{report_id:#04x}]: {}",
            protocol::format_traffic(Direction::In, &payload)
        );
    }
    Ok(())
}
