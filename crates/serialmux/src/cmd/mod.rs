use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::{Args, Subcommand};
use serialmux_mux::Policy;
use serialmux_transport::{Parity, StopBits};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod engine;
pub mod loopback;
pub mod ports;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bridge a serial device to network listeners.
    Serve(ServeArgs),
    /// Run the bridge over an in-memory device that echoes every write.
    Loopback(LoopbackArgs),
    /// List serial ports.
    Ports(PortsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Channel layout and listener settings shared by `serve` and `loopback`.
#[derive(Args, Debug, Clone)]
pub struct BridgeArgs {
    /// First TCP port; channel N listens on base-port + N - 1.
    #[arg(long, default_value_t = 1300, env = "SERIALMUX_BASE_PORT")]
    pub base_port: u16,
    /// Address TCP listeners bind to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED), env = "SERIALMUX_BIND")]
    pub bind: IpAddr,
    /// Listen on Unix sockets `<DIR>/chN.sock` instead of TCP.
    #[arg(long, value_name = "DIR", env = "SERIALMUX_UNIX_DIR")]
    pub unix_dir: Option<PathBuf>,
    /// Channel policy: six framed channels or one raw passthrough.
    #[arg(long, default_value_t = Policy::Framed, env = "SERIALMUX_POLICY")]
    pub policy: Policy,
    /// Reassemble frame headers split across reads.
    #[arg(long, env = "SERIALMUX_REASSEMBLE")]
    pub reassemble: bool,
    /// Socket read size per client.
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u16).range(1..))]
    pub read_buffer: u16,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Serial device path (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, short = 'd', env = "SERIALMUX_DEVICE")]
    pub device: String,
    /// Baud rate.
    #[arg(long, default_value_t = 38400, env = "SERIALMUX_BAUD")]
    pub baud: u32,
    /// Data bits.
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(5..=8))]
    pub data_bits: u8,
    /// Parity: none, odd or even.
    #[arg(long, default_value = "even")]
    pub parity: Parity,
    /// Stop bits: 1 or 2.
    #[arg(long, default_value = "1")]
    pub stop_bits: StopBits,
    /// How often to retry opening a lost device (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub revive_period: String,
    #[command(flatten)]
    pub bridge: BridgeArgs,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    #[command(flatten)]
    pub bridge: BridgeArgs,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
