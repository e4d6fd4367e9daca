//! Serial line settings and their `serialport` equivalents.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity as SpParity, StopBits as SpStopBits};

/// Parity setting for the serial line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    #[default]
    Even,
}

impl Parity {
    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(format!("unknown parity '{other}' (expected none, odd or even)")),
        }
    }
}

/// Stop bits for the serial line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl FromStr for StopBits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(StopBits::One),
            "2" => Ok(StopBits::Two),
            other => Err(format!("unsupported stop bits '{other}' (expected 1 or 2)")),
        }
    }
}

/// Line format used when opening the physical port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineConfig {
    pub baud_rate: u32,
    /// 5 through 8.
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Upper bound on a single blocking read. Keeps the io thread responsive
    /// to new submissions and shutdown.
    pub read_timeout: Duration,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: 38_400,
            data_bits: 8,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(20),
        }
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            stop
        )
    }
}

/// Apply a line config to a `serialport` builder.
pub(crate) fn configure(
    builder: serialport::SerialPortBuilder,
    line: &LineConfig,
) -> serialport::SerialPortBuilder {
    builder
        .data_bits(to_serialport_data_bits(line.data_bits))
        .parity(to_serialport_parity(line.parity))
        .stop_bits(to_serialport_stop_bits(line.stop_bits))
        .flow_control(FlowControl::None)
        .timeout(line.read_timeout)
}

fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn to_serialport_stop_bits(bits: StopBits) -> SpStopBits {
    match bits {
        StopBits::One => SpStopBits::One,
        StopBits::Two => SpStopBits::Two,
    }
}
