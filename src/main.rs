use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sensor_flow_provisioner::cli::{Cli, Commands, DecodeArgs, SensorArgs, ServeArgs};
use sensor_flow_provisioner::config::Config;
use sensor_flow_provisioner::decoder::native::decode_payload;
use sensor_flow_provisioner::decoder::DecoderPlan;
use sensor_flow_provisioner::http;
use sensor_flow_provisioner::model::{DecodingConfig, SensorDescriptor};
use sensor_flow_provisioner::provisioner::Provisioner;
use serde::de::DeserializeOwned;
use std::path::Path;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_flow_provisioner=info".into());
    // stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn load_inputs(args: &SensorArgs) -> Result<(SensorDescriptor, DecodingConfig)> {
    let sensor: SensorDescriptor = read_json(&args.sensor)?;
    let config: DecodingConfig = read_json(&args.config)?;
    sensor
        .validate()
        .with_context(|| format!("invalid sensor descriptor {}", args.sensor.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid decoding config {}", args.config.display()))?;
    Ok((sensor, config))
}

fn build_provisioner() -> Result<(Config, Provisioner)> {
    let config = Config::from_env()?;
    let provisioner = Provisioner::from_config(&config)?;
    Ok((config, provisioner))
}

async fn generate(args: SensorArgs) -> Result<()> {
    let (sensor, config) = load_inputs(&args)?;
    let (_, provisioner) = build_provisioner()?;
    let flow = provisioner.generate_flow(sensor, config).await?;
    println!("{}", serde_json::to_string_pretty(&flow)?);
    Ok(())
}

async fn deploy(args: SensorArgs) -> Result<()> {
    let (sensor, config) = load_inputs(&args)?;
    let sensor_id = sensor.id.clone();
    let (_, provisioner) = build_provisioner()?;
    if !provisioner.provision(sensor, config).await {
        return Err(anyhow!("deployment of sensor {sensor_id} failed"));
    }
    println!("deployed {sensor_id}");
    Ok(())
}

async fn delete(sensor_id: &str) -> Result<()> {
    let (_, provisioner) = build_provisioner()?;
    if !provisioner.delete_flow(sensor_id).await {
        return Err(anyhow!("deletion of sensor {sensor_id} failed"));
    }
    println!("deleted {sensor_id}");
    Ok(())
}

fn decode(args: DecodeArgs) -> Result<()> {
    let (sensor, config) = load_inputs(&args.input)?;
    let payload = hex::decode(args.payload_hex.trim()).context("invalid --payload-hex")?;
    let received_at_ns = args
        .received_at_ns
        .or_else(|| chrono::Utc::now().timestamp_nanos_opt())
        .unwrap_or_default();

    let plan = DecoderPlan::new(&sensor, &config);
    let record = decode_payload(&plan, &payload, received_at_ns)?;
    println!("{}", serde_json::to_string_pretty(&record.to_payload())?);
    Ok(())
}

fn check_config(args: SensorArgs) -> Result<()> {
    let (sensor, config) = load_inputs(&args)?;
    println!(
        "{}: {} fields, time from {:?}, measurement {}",
        sensor.id,
        config.fields.len(),
        config.time.from,
        config.db.measurement
    );
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let (config, provisioner) = build_provisioner()?;
    let bind = args.bind.unwrap_or(config.http_bind);

    let app = http::router(http::HttpState { provisioner });
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(bind = %bind, "provisioner HTTP listening");
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = http_handle => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    match cli.command {
        Commands::Generate(args) => generate(args).await,
        Commands::Deploy(args) => deploy(args).await,
        Commands::Delete(args) => delete(&args.sensor_id).await,
        Commands::Decode(args) => decode(args),
        Commands::CheckConfig(args) => check_config(args),
        Commands::Serve(args) => serve(args).await,
    }
}
