use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serialmux_mux::DispatchStats;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One bound channel listener.
#[derive(Debug, Serialize)]
pub struct ListenerRow {
    pub address: u8,
    pub listen: String,
}

/// One serial port found on the system.
#[derive(Debug, Serialize)]
pub struct PortRow {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    device: &'a str,
    reads: u64,
    delivered: u64,
    bytes: u64,
    unclaimed: u64,
    errors: u64,
}

pub fn print_listeners(device: &str, rows: &[ListenerRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct ListenersOutput<'a> {
                device: &'a str,
                listeners: &'a [ListenerRow],
            }
            print_json(&ListenersOutput {
                device,
                listeners: rows,
            });
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["CHANNEL", "LISTEN"]);
            for row in rows {
                table.add_row(vec![row.address.to_string(), row.listen.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!("device={device} channel={} listen={}", row.address, row.listen);
            }
        }
    }
}

pub fn print_stats(device: &str, stats: &DispatchStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&StatsOutput {
            device,
            reads: stats.reads,
            delivered: stats.delivered,
            bytes: stats.bytes,
            unclaimed: stats.unclaimed,
            errors: stats.errors,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["READS", "DELIVERED", "BYTES", "UNCLAIMED", "ERRORS"]);
            table.add_row(vec![
                stats.reads.to_string(),
                stats.delivered.to_string(),
                stats.bytes.to_string(),
                stats.unclaimed.to_string(),
                stats.errors.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "device={device} reads={} delivered={} bytes={} unclaimed={} errors={}",
                stats.reads, stats.delivered, stats.bytes, stats.unclaimed, stats.errors
            );
        }
    }
}

pub fn print_ports(ports: &[PortRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(ports),
        OutputFormat::Table => {
            let mut table = new_table(vec!["PORT", "TYPE", "VID:PID", "MANUFACTURER", "PRODUCT"]);
            for port in ports {
                table.add_row(vec![
                    port.port_name.clone(),
                    port.port_type.clone(),
                    usb_id(port),
                    port.manufacturer.clone().unwrap_or_default(),
                    port.product.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                println!(
                    "{} type={} id={}",
                    port.port_name,
                    port.port_type,
                    usb_id(port)
                );
            }
        }
    }
}

fn usb_id(port: &PortRow) -> String {
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!("{vid:04x}:{pid:04x}"),
        _ => "-".to_string(),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}
