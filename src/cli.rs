use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sensor-flow-provisioner",
    version,
    about = "Generates sensor decoding flows and reconciles them with the flow engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the instantiated flow for a sensor without deploying it.
    Generate(SensorArgs),
    /// Generate a flow and create or update it on the engine.
    Deploy(SensorArgs),
    /// Remove the flow labelled with the sensor ID.
    Delete(DeleteArgs),
    /// Decode a captured payload with the layout config.
    Decode(DecodeArgs),
    CheckConfig(SensorArgs),
    /// Run the HTTP control surface.
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct SensorArgs {
    /// Sensor descriptor JSON file.
    #[arg(long)]
    pub sensor: PathBuf,
    /// Decoding config JSON file.
    #[arg(long)]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub sensor_id: String,
}

#[derive(Args)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub input: SensorArgs,
    #[arg(long)]
    pub payload_hex: String,
    /// Receive time used for network-timed sensors; defaults to now.
    #[arg(long)]
    pub received_at_ns: Option<i64>,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Overrides PROVISIONER_HTTP_BIND.
    #[arg(long)]
    pub bind: Option<String>,
}
