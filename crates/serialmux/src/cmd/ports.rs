use serialport::{SerialPortInfo, SerialPortType};

use crate::cmd::PortsArgs;
use crate::exit::{CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_ports, OutputFormat, PortRow};

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = serialport::available_ports().map_err(|err| {
        CliError::new(TRANSPORT_ERROR, format!("failed to enumerate ports: {err}"))
    })?;

    let rows: Vec<PortRow> = ports.into_iter().filter(is_listed).map(to_row).collect();
    print_ports(&rows, format);
    Ok(SUCCESS)
}

/// On macOS only the non-blocking `/dev/cu.*` nodes are useful to open.
fn is_listed(_port: &SerialPortInfo) -> bool {
    #[cfg(target_os = "macos")]
    {
        !_port.port_name.starts_with("/dev/tty.")
    }
    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}

fn to_row(port: SerialPortInfo) -> PortRow {
    let mut row = PortRow {
        port_name: port.port_name,
        port_type: String::new(),
        manufacturer: None,
        product: None,
        serial_number: None,
        vid: None,
        pid: None,
    };
    row.port_type = match port.port_type {
        SerialPortType::UsbPort(info) => {
            row.manufacturer = info.manufacturer;
            row.product = info.product;
            row.serial_number = info.serial_number;
            row.vid = Some(info.vid);
            row.pid = Some(info.pid);
            "USB"
        }
        SerialPortType::PciPort => "PCI",
        SerialPortType::BluetoothPort => "Bluetooth",
        SerialPortType::Unknown => "Unknown",
    }
    .to_string();
    row
}
