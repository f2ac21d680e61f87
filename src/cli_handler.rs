//! Command handling for rtmp-relay.
//!
//! The default command provisions the relay and supervises it until Ctrl-C.
//! The `devices`, `port` and `unforward` subcommands are one-shot queries
//! that need neither a server path nor an operator.

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::{Config, Settings};
use crate::console::{self, ConsoleHooks, LaunchStatus};
use crate::device::{self, AdbBridge, DeviceRegistry, RegistrySettings, SelectionPreference};
use crate::orchestrator::{HeadlessHooks, OperatorHooks, Workflow, WorkflowState};
use crate::port::{PortBinding, PortForwardManager};
use crate::process::{PortOwner, ProcessInspector, SystemInspector};
use crate::server::LivenessStatus;

/// Dispatch the parsed command line against a loaded configuration.
pub fn handle(cli: &Cli, config: &Config) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        match &cli.command {
            None => run_provision(cli, config).await,
            Some(Commands::Devices) => list_devices(config).await,
            Some(Commands::Port { target }) => show_port(config, *target).await,
            Some(Commands::Unforward) => unforward(config).await,
        }
    })
}

async fn run_provision(cli: &Cli, config: &Config) -> Result<()> {
    let settings = config.validate().context("Invalid configuration")?;
    info!(
        "Provisioning relay on port {} with {}",
        settings.port,
        settings.server.display()
    );

    if cli.headless {
        provision(cli, &settings, HeadlessHooks).await
    } else {
        provision(cli, &settings, ConsoleHooks).await
    }
}

async fn provision<H: OperatorHooks>(cli: &Cli, settings: &Settings, hooks: H) -> Result<()> {
    let bridge = Arc::new(AdbBridge::new(settings.bridge.clone()));
    let inspector = Arc::new(SystemInspector::new(settings.timing.termination_grace));
    let mut workflow = Workflow::from_settings(settings, bridge.clone(), inspector, hooks);

    let state = workflow.run().await;
    if !state.is_ready() {
        println!(
            "{}",
            console::render_summary(&state, settings, &LaunchStatus::Skipped, false)
        );
        // The forward may already be installed when the server fails.
        if let Err(e) = workflow.teardown(&state).await {
            warn!("Cleanup after failed run: {}", e);
        }
        bail!("Provisioning aborted");
    }

    let launch = launch_companion(bridge.as_ref(), settings, &state).await;
    let clipboard = console::copy_to_clipboard(&settings.stream_url());
    println!(
        "{}",
        console::render_summary(&state, settings, &launch, clipboard.is_some())
    );

    // Nothing to supervise; the forward stays for the operator's own server.
    if state.server.is_none() {
        workflow.detach(&state);
        return Ok(());
    }

    if cli.detach {
        workflow.detach(&state);
        info!("Detached; relay left running");
        return Ok(());
    }

    let crashed = supervise(&mut workflow, settings).await;
    workflow
        .teardown(&state)
        .await
        .context("Failed to tear down relay")?;
    println!("\x1b[33mRelay stopped and forward removed.\x1b[0m");

    if crashed {
        bail!("Relay server exited unexpectedly");
    }
    Ok(())
}

async fn launch_companion(bridge: &AdbBridge, settings: &Settings, state: &WorkflowState) -> LaunchStatus {
    let (Some(component), Some(device)) = (&settings.package, &state.device) else {
        return LaunchStatus::Skipped;
    };
    if !settings.launch_app {
        return LaunchStatus::Skipped;
    }

    match device::launch_app(bridge, device.id(), component, settings.timing.bridge_timeout).await {
        Ok(()) => LaunchStatus::Launched(component.clone()),
        Err(e) => {
            warn!("Could not launch {}: {}", component, e);
            LaunchStatus::Failed(e)
        }
    }
}

/// Poll the server until Ctrl-C. Returns true if it died on its own.
async fn supervise<H: OperatorHooks>(
    workflow: &mut Workflow<AdbBridge, SystemInspector, H>,
    settings: &Settings,
) -> bool {
    let mut ticker = tokio::time::interval(settings.timing.supervise_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Could not listen for Ctrl-C: {}", e);
                }
                info!("Interrupted, shutting down");
                return false;
            }
            _ = ticker.tick() => match workflow.supervise() {
                LivenessStatus::Alive => {}
                LivenessStatus::Exited { code } => {
                    eprintln!("\x1b[31mRelay server exited (code {:?})\x1b[0m", code);
                    return true;
                }
                LivenessStatus::NotRunning => return true,
            },
        }
    }
}

fn registry(config: &Config) -> Result<(Arc<AdbBridge>, DeviceRegistry<AdbBridge>)> {
    let bridge = Arc::new(AdbBridge::new(
        config.resolve_bridge().context("No usable device bridge")?,
    ));
    let timing = config.timing();
    let registry = DeviceRegistry::new(
        bridge.clone(),
        RegistrySettings {
            fetch_models: config.options.fetch_device_models.unwrap_or(true),
            command_timeout: timing.bridge_timeout,
            model_timeout: timing.model_timeout,
        },
    );
    Ok((bridge, registry))
}

async fn list_devices(config: &Config) -> Result<()> {
    let (_, registry) = registry(config)?;
    let version = registry.bridge_version().await?;
    let devices = registry.discover().await?;

    println!("\x1b[1mDevice bridge {}\x1b[0m", version);
    if devices.is_empty() {
        println!("No devices attached.");
        return Ok(());
    }
    for device in &devices {
        println!(
            "  {:<28} {:<9} {:<13} {}",
            device.id(),
            device.connection().to_string(),
            device.state().to_string(),
            device.model().unwrap_or("-")
        );
    }
    Ok(())
}

async fn show_port(config: &Config, target: Option<u16>) -> Result<()> {
    let port = match target {
        Some(port) => port,
        None => config.port()?,
    };
    let identity = config
        .paths
        .server_identity
        .clone()
        .or_else(|| {
            config
                .paths
                .server
                .as_ref()
                .and_then(|server| server.file_name())
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    let inspector = SystemInspector::new(config.timing().termination_grace);
    let owner = inspector.find_owner(port).await;
    if let PortOwner::Unknown = owner {
        println!("Port {} is in use, but its owner could not be determined.", port);
        return Ok(());
    }

    match PortBinding::observed(port, owner, &identity) {
        Some(binding) if binding.is_free() => println!("Port {} is free.", port),
        Some(PortBinding {
            owner: Some(owner),
            classification,
            ..
        }) => {
            println!("Port {} is held by {} ({:?}).", port, owner, classification);
            if let Some(exe) = &owner.exe {
                println!("  Executable: {}", exe.display());
            }
        }
        _ => println!("Port {} is in use.", port),
    }
    Ok(())
}

async fn unforward(config: &Config) -> Result<()> {
    let (bridge, registry) = registry(config)?;
    let port = config.port()?;

    let device_id = match &config.device.serial {
        Some(serial) => serial.clone(),
        None => {
            let devices = registry.discover().await?;
            let preference = SelectionPreference {
                auto_select_single: true,
                preferred: None,
            };
            device::select(&devices, &preference)?.id().to_string()
        }
    };

    let forwarder = PortForwardManager::new(bridge, config.timing().bridge_timeout);
    if forwarder.remove(&device_id, port).await? {
        println!("Removed reverse forward tcp:{} on {}.", port, device_id);
    } else {
        println!("No reverse forward for tcp:{} on {}.", port, device_id);
    }
    Ok(())
}
