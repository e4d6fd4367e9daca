use std::sync::Arc;
use std::time::Duration;

use serialmux_transport::{spawn_reviver, LineConfig, ReviverConfig, SerialDevice};
use tracing::info;

use crate::cmd::engine::{runtime, serve};
use crate::cmd::ServeArgs;
use crate::exit::{transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let line = line_config(&args);
    let reviver = ReviverConfig {
        period: parse_period(&args.revive_period)?,
    };

    // An absent device at startup is an error; later losses are revived.
    let device = Arc::new(
        SerialDevice::open(args.device.clone(), line)
            .map_err(|err| transport_error("open failed", err))?,
    );
    info!(path = device.path(), line = %device.line(), "serial device opened");

    runtime()?.block_on(async {
        let reviving = spawn_reviver(Arc::clone(&device), reviver);
        let result = serve(device, &args.bridge, format).await;
        reviving.abort();
        result
    })
}

fn line_config(args: &ServeArgs) -> LineConfig {
    LineConfig {
        baud_rate: args.baud,
        data_bits: args.data_bits,
        parity: args.parity,
        stop_bits: args.stop_bits,
        ..LineConfig::default()
    }
}

fn parse_period(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "revive period must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid revive period: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "revive period must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
