use serialmux_transport::{LoopbackDevice, LoopbackRemote};
use tracing::{info, trace, Level};

use crate::cmd::engine::{runtime, serve};
use crate::cmd::LoopbackArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    runtime()?.block_on(async {
        let (device, remote) = LoopbackDevice::new("loopback");
        info!(policy = %args.bridge.policy, "loopback device echoes every write");
        let echo = tokio::spawn(echo(remote));
        let result = serve(device, &args.bridge, format).await;
        echo.abort();
        result
    })
}

/// Feed every buffer written to the device straight back as received data.
/// Framed writes come back on the channel that sent them.
async fn echo(mut remote: LoopbackRemote) {
    while let Some(written) = remote.recv().await {
        if tracing::enabled!(Level::TRACE) {
            trace!(
                bytes = %serialmux_frame::format_bytes(&written),
                "loopback echo"
            );
        }
        remote.inject(&written);
    }
}
