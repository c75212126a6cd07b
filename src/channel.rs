use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::NoticeSource;
use crate::model::ChannelScope;
use crate::state::{ChannelStatus, Epoch, SyncEvent};

/// Push subscription for one project/cluster pair.
///
/// Every notice is forwarded as `SyncEvent::Notice` tagged with the epoch the
/// channel was opened under. The channel never reconnects on its own; a lost
/// connection is reported once and the periodic poll takes over.
#[derive(Debug)]
pub struct LiveChannel {
    scope: ChannelScope,
    epoch: Epoch,
    task: JoinHandle<()>,
}

impl LiveChannel {
    pub fn open(
        source: Arc<dyn NoticeSource>,
        scope: ChannelScope,
        epoch: Epoch,
        tx: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut notices = match source.subscribe(scope).await {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(%epoch, %error, "channel: subscribe failed");
                    let _ = tx.send(SyncEvent::Channel {
                        epoch,
                        status: ChannelStatus::Lost(error.to_string()),
                    });
                    return;
                }
            };
            let _ = tx.send(SyncEvent::Channel {
                epoch,
                status: ChannelStatus::Live,
            });

            while let Some(next) = notices.next().await {
                match next {
                    Ok(notice) => {
                        debug!(%epoch, bytes = notice.payload_len(), "channel: notice");
                        if tx.send(SyncEvent::Notice(epoch)).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(%epoch, %error, "channel: stream error");
                        let _ = tx.send(SyncEvent::Channel {
                            epoch,
                            status: ChannelStatus::Lost(error.to_string()),
                        });
                        return;
                    }
                }
            }

            let _ = tx.send(SyncEvent::Channel {
                epoch,
                status: ChannelStatus::Lost("stream ended".to_string()),
            });
        });

        Self { scope, epoch, task }
    }

    pub fn close(self) {
        debug!(epoch = %self.epoch, scope = ?self.scope, "channel: closed");
        // Drop aborts the reader task.
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}
