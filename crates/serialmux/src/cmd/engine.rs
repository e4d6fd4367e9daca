//! The serve loop shared by every device-backed command.

use std::sync::Arc;

use serialmux_bridge::{run_all, BridgeConfig, BridgeListener, ListenAddr};
use serialmux_frame::Address;
use serialmux_mux::{DispatcherConfig, Multiplexer};
use serialmux_transport::{Device, ManagerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::BridgeArgs;
use crate::exit::{bridge_error, io_error, mux_error, CliResult, SUCCESS};
use crate::output::{print_listeners, print_stats, ListenerRow, OutputFormat};

impl BridgeArgs {
    /// Where the channel at `address` listens.
    pub fn listen_addr(&self, address: Address) -> CliResult<ListenAddr> {
        match &self.unix_dir {
            Some(dir) => Ok(ListenAddr::Unix(
                dir.join(format!("ch{}.sock", address.get())),
            )),
            None => ListenAddr::for_channel(self.bind, self.base_port, address.index())
                .map_err(|err| bridge_error("invalid listen address", err)),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            policy: self.policy,
            reassemble: self.reassemble,
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            read_buffer_size: usize::from(self.read_buffer),
        }
    }
}

/// Build the current-thread runtime every command runs on.
pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))
}

/// Multiplex `device`, bind one listener per channel and relay until Ctrl-C.
pub async fn serve(device: Arc<dyn Device>, args: &BridgeArgs, format: OutputFormat) -> CliResult<i32> {
    let name = device.name().to_string();
    let mux = Multiplexer::start(device, ManagerConfig::default(), args.dispatcher_config())
        .map_err(|err| mux_error("multiplexer start failed", err))?;

    let listeners = match bind_all(&mux, args).await {
        Ok(listeners) => listeners,
        Err(err) => {
            mux.shutdown().await;
            return Err(err);
        }
    };

    let rows: Vec<ListenerRow> = listeners
        .iter()
        .map(|listener| ListenerRow {
            address: listener.channel().address().get(),
            listen: listener.local_addr().to_string(),
        })
        .collect();
    print_listeners(&name, &rows, format);

    let shutdown = CancellationToken::new();
    let bridges = run_all(listeners, shutdown.clone());
    tokio::pin!(bridges);

    let result = tokio::select! {
        result = &mut bridges => result,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(err) => warn!(error = %err, "failed to listen for interrupt, shutting down"),
            }
            shutdown.cancel();
            bridges.await
        }
    };

    let stats = mux.shutdown().await;
    print_stats(&name, &stats, format);

    result.map_err(|err| bridge_error("bridge failed", err))?;
    Ok(SUCCESS)
}

async fn bind_all(mux: &Multiplexer, args: &BridgeArgs) -> CliResult<Vec<BridgeListener>> {
    let config = args.bridge_config();
    let mut listeners = Vec::with_capacity(mux.channels().len());
    for channel in mux.channels() {
        let addr = args.listen_addr(channel.address())?;
        let listener = BridgeListener::bind(&addr, Arc::clone(channel), config.clone())
            .await
            .map_err(|err| bridge_error("bind failed", err))?;
        listeners.push(listener);
    }
    Ok(listeners)
}
