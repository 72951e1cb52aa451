// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! uStreamer Service CLI
//!
//! Hosts the streamer service on the in-process transport.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults until Ctrl+C
//! ustreamer-service
//!
//! # Using configuration file
//! ustreamer-service --config ustreamer.toml
//!
//! # Lock/unlock round trip against an in-process client
//! ustreamer-service demo
//! ```

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use ustreamer_service::door::METHOD_EXECUTE_DOOR_COMMAND;
use ustreamer_service::{
    ConfigError, Door, DoorAction, DoorCommand, LocalSubscriptionRegistry, LocalTransport,
    MonitorEngine, RouterStatsSnapshot, ServiceConfig, UEntity, UListener, UMessage,
    UMessageType, UStatus, UStreamerService, UTransport, UUri,
};

/// uStreamer request routing service
#[derive(Parser, Debug)]
#[command(name = "ustreamer-service")]
#[command(about = "uStreamer Service - RPC dispatch and engine handoff over pub/sub")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entity name (overrides the configuration)
    #[arg(long)]
    entity: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "ustreamer.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run a lock/unlock round trip against an in-process client
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = build_config(&args)?;

    // Initialize logging
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
            Commands::Demo => cmd_demo(config).await,
        };
    }

    let service = build_service(config.clone())?;

    println!("uStreamer Service v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!("Entity: {}", service.topology().service_uri());
    for (_, uri) in service.topology().method_uris() {
        println!("Method: {}", uri);
    }
    for (_, uri) in service.topology().door_topics() {
        println!("Topic:  {}", uri);
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    service.start().await?;
    let service = Arc::new(service);

    // Stats reporting task
    let stats_interval = config.stats_interval_secs;
    let stats_service = service.clone();
    let stats_task = (stats_interval > 0).then(|| {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                print_stats(&stats_service.router_stats());
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    if let Some(task) = stats_task {
        task.abort();
    }
    service.shutdown().await;

    println!("\nFinal Statistics:");
    print_stats(&service.router_stats());
    Ok(())
}

fn build_config(args: &Args) -> Result<ServiceConfig, ConfigError> {
    let mut config = match args.config {
        Some(ref path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(ref entity) = args.entity {
        config.entity.name = entity.clone();
        config.validate()?;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

fn build_service(config: ServiceConfig) -> Result<UStreamerService, ConfigError> {
    let transport = Arc::new(LocalTransport::new(config.entity()));
    let registry = Arc::new(LocalSubscriptionRegistry::new());
    let engine = Arc::new(MonitorEngine::new(config.bridge.engine_topic_uris()?));
    Ok(UStreamerService::new(config, transport, registry, engine))
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServiceConfig {
        name: "example-streamer".into(),
        ..Default::default()
    };
    config.doors.push("rear_left".into());
    config.stats_interval_secs = 30;

    let toml_str = config.to_toml()?;

    // Add comments
    let content = format!(
        r#"# uStreamer Service Configuration
# Generated by ustreamer-service gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match ServiceConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Service: {}", config.name);
            println!(
                "Entity:  {} v{}",
                config.entity.name, config.entity.version_major
            );
            println!("Doors:   {}", config.doors.join(", "));
            println!("Methods: {}", config.methods.join(", "));
            println!(
                "Bridge:  {}",
                if config.bridge.enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

async fn cmd_demo(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(LocalTransport::new(config.entity()));
    let registry = Arc::new(LocalSubscriptionRegistry::new());
    let engine = Arc::new(MonitorEngine::new(config.bridge.engine_topic_uris()?));
    let service = UStreamerService::new(config, transport.clone(), registry, engine);
    service.start().await?;

    let method = service
        .topology()
        .method_uri(METHOD_EXECUTE_DOOR_COMMAND)
        .cloned()
        .ok_or("door command method is not advertised")?;
    let client = UUri::for_entity(UEntity::new("client.demo", 1));

    let inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = inbox.clone();
    let listener: Arc<dyn UListener> = Arc::new(move |m: UMessage| sink.lock().push(m));
    transport.register_listener(&client, listener.clone()).await?;
    for (_, topic) in service.topology().door_topics() {
        transport.register_listener(topic, listener.clone()).await?;
    }

    let commands = [
        DoorCommand::new("front_left", DoorAction::Lock),
        DoorCommand::new("front_left", DoorAction::Unlock),
        DoorCommand::new("rear_left", DoorAction::Lock),
        DoorCommand {
            action: 42,
            ..DoorCommand::new("front_right", DoorAction::Lock)
        },
    ];
    for command in &commands {
        println!(
            "-> {} door={} action={}",
            METHOD_EXECUTE_DOOR_COMMAND, command.door.instance, command.action
        );
        transport.send(UMessage::request(client.clone(), method.clone(), command)?)?;
    }

    // Responses are immediate; door events follow on the executor.
    tokio::time::sleep(Duration::from_millis(200)).await;
    service.shutdown().await;

    for message in inbox.lock().iter() {
        match message.attributes.kind {
            UMessageType::Response => {
                let status: UStatus = message.payload.unpack()?;
                println!("<- response {}", status);
            }
            UMessageType::Publish => {
                let door: Door = message.payload.unpack()?;
                println!(
                    "<- event {} locked={}",
                    message.source(),
                    door.locked
                );
            }
            UMessageType::Request => {}
        }
    }
    println!();
    print_stats(&service.router_stats());
    Ok(())
}

fn print_stats(stats: &RouterStatsSnapshot) {
    println!("--- Router Statistics ---");
    println!(
        "  {} received, {} dispatched ({:.1} req/s), {} unmatched, {} rejected, {} dropped",
        stats.received,
        stats.dispatched,
        stats.dispatch_rate(),
        stats.unmatched,
        stats.rejected,
        stats.enqueue_failures
    );
}
