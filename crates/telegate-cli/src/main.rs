//! telegated - TeleGate gateway launcher
//!
//! Loads settings from a file, `TELEGATE__*` environment variables and
//! command-line overrides, then runs the configured transport until Ctrl-C.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use telegate_core::config::{
    Settings, SettingsBuilder, CODEC_NAME, LOG_JSON, LOG_LEVEL, NET_CHANNEL_TYPE, RUN_TYPE, SERVER_HOST,
    SERVER_PORT,
};
use telegate_dispatch::GatewayContext;
use telegate_transport::{ClientEndpoint, CodecRegistry};

#[derive(Parser)]
#[command(name = "telegated")]
#[command(author, version, about = "Fleet-vehicle telegram gateway")]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long, env = "TELEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `telegate_dispatch=debug`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Codec used to decode and encode telegrams
    #[arg(long)]
    codec: Option<String>,

    /// Transport: TCP, UDP or RXTX
    #[arg(short, long)]
    transport: Option<String>,

    /// Run type: SERVER or CLIENT
    #[arg(short, long)]
    run_type: Option<String>,

    /// Listen address in server mode
    #[arg(long)]
    host: Option<String>,

    /// Listen port in server mode
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default)
    Serve,

    /// Validate the settings and print the effective transport setup
    Check,

    /// List the available codecs and transports
    Codecs,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut builder = SettingsBuilder::new().with_environment_prefix("TELEGATE");
        if let Some(path) = &self.config {
            builder = builder.with_config_file(path);
        }

        let overrides = [
            (LOG_LEVEL, self.log_level.clone()),
            (LOG_JSON, self.log_json.then(|| "true".to_string())),
            (CODEC_NAME, self.codec.clone()),
            (NET_CHANNEL_TYPE, self.transport.clone()),
            (RUN_TYPE, self.run_type.clone()),
            (SERVER_HOST, self.host.clone()),
            (SERVER_PORT, self.port.map(|p| p.to_string())),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                builder = builder.with_override(key, value);
            }
        }

        builder.build().context("failed to load settings")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings).await,
        Commands::Check => check(&settings),
        Commands::Codecs => {
            println!("codecs:     {}", CodecRegistry::with_builtin().names().join(", "));
            println!("transports: {}", telegate_transport::available_transports().join(", "));
            Ok(())
        }
    }
}

async fn serve(settings: Settings) -> Result<()> {
    telegate_core::init(&settings)?;
    telegate_transport::init()?;
    telegate_dispatch::init()?;

    let context = GatewayContext::from_settings(settings).context("failed to build gateway context")?;
    context.identity().warm_up();

    let mut transport = context
        .start_transport()
        .await
        .context("failed to start transport")?;
    match transport.local_addr() {
        Some(addr) => info!("{} {} listening on {}", transport.kind(), transport.run_type(), addr),
        None => info!("{} {} running", transport.kind(), transport.run_type()),
    }

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    transport.shutdown();
    context.reset();
    Ok(())
}

fn check(settings: &Settings) -> Result<()> {
    let codecs = CodecRegistry::with_builtin();
    let codec = settings.codec_name();
    if !codecs.contains(&codec) {
        bail!("unknown codec [{}], available: {}", codec, codecs.names().join(", "));
    }

    println!("transport:  {} {}", settings.net_channel_type(), settings.run_type());
    println!("listen:     {}:{}", settings.server_host(), settings.server_port());
    println!("codec:      {}", codec);
    println!("dev mode:   {}", settings.is_dev_mode());
    for raw in settings.client_endpoints() {
        let endpoint: ClientEndpoint = raw
            .parse()
            .with_context(|| format!("invalid client endpoint [{}]", raw))?;
        println!("client:     {} -> {}", endpoint.name, endpoint.key());
    }
    match settings.move_request_cmd() {
        Ok(cmd) => println!("move cmd:   {}", cmd),
        Err(_) => println!("move cmd:   (not set, move requests disabled)"),
    }
    Ok(())
}
