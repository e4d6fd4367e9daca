use std::sync::Arc;

use serialmux_frame::Address;
use serialmux_transport::{Device, ManagerConfig, TransferManager};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channel::Channel;
use crate::dispatcher::{DispatchStats, Dispatcher, DispatcherConfig};
use crate::error::{MuxError, Result};
use crate::policy::Policy;
use crate::writer::{spawn_writer, ChannelSender};

/// A running multiplexer: the transfer manager, the single writer, the
/// dispatcher and the channels they serve.
pub struct Multiplexer {
    channels: Vec<Arc<Channel>>,
    manager: Arc<TransferManager>,
    policy: Policy,
    writer: JoinHandle<()>,
    dispatcher: JoinHandle<DispatchStats>,
}

impl Multiplexer {
    /// Start everything on `device`. Must be called inside a tokio runtime.
    pub fn start(
        device: Arc<dyn Device>,
        manager_config: ManagerConfig,
        config: DispatcherConfig,
    ) -> Result<Self> {
        let (manager, inbound) = TransferManager::start(device, manager_config)?;
        let manager = Arc::new(manager);
        let (queue, writer) = spawn_writer(Arc::clone(&manager), config.policy);

        let channels: Vec<Arc<Channel>> = Address::all()
            .take(config.policy.channel_count())
            .map(|address| Channel::new(ChannelSender::new(address, queue.clone())))
            .collect();

        info!(
            device = manager.device().name(),
            policy = %config.policy,
            reassemble = config.reassemble,
            channels = channels.len(),
            "multiplexer started"
        );

        let policy = config.policy;
        let dispatcher = tokio::spawn(Dispatcher::new(channels.clone(), config).run(inbound));

        Ok(Self {
            channels,
            manager,
            policy,
            writer,
            dispatcher,
        })
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn channel(&self, address: Address) -> Result<&Arc<Channel>> {
        self.channels
            .get(address.index())
            .ok_or(MuxError::NoSuchChannel(address.get()))
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn manager(&self) -> &Arc<TransferManager> {
        &self.manager
    }

    /// Drain the transfer manager, stop the writer and collect the
    /// dispatcher's counters.
    pub async fn shutdown(self) -> DispatchStats {
        let manager = Arc::clone(&self.manager);
        if let Err(err) = tokio::task::spawn_blocking(move || manager.shutdown()).await {
            warn!(error = %err, "transfer manager shutdown task failed");
        }
        self.writer.abort();

        match self.dispatcher.await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(error = %err, "dispatcher task failed");
                DispatchStats::default()
            }
        }
    }
}
