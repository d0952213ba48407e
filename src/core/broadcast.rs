use std::time::Duration;

use crossbeam::channel::{SendTimeoutError, Sender};

use crate::core::message::Message;
use crate::error::BroadcastError;

/// 集群同步广播。
///
/// ## 契约
/// - `send_sync` 阻塞到集群确认或明确失败后才返回。
/// - 超时/重试策略归实现方所有，调用方（View）不会重试。
pub trait Broadcaster: Send + Sync {
    fn send_sync(&self, msg: &Message) -> Result<(), BroadcastError>;
}

/// 单机模式：不发送，直接成功
#[derive(Clone, Copy, Debug, Default)]
pub struct NopBroadcaster;

impl Broadcaster for NopBroadcaster {
    fn send_sync(&self, msg: &Message) -> Result<(), BroadcastError> {
        tracing::debug!("nop broadcast: {:?}", msg);
        Ok(())
    }
}

/// 进程内广播：消息投递进有界 channel 即视为确认。
/// 队列满且超时未能投递时返回 `Timeout`。
pub struct ChannelBroadcaster {
    tx: Sender<Message>,
    timeout: Duration,
}

impl ChannelBroadcaster {
    pub fn new(tx: Sender<Message>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn send_sync(&self, msg: &Message) -> Result<(), BroadcastError> {
        match self.tx.send_timeout(msg.clone(), self.timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(BroadcastError::Timeout(self.timeout)),
            Err(SendTimeoutError::Disconnected(_)) => Err(BroadcastError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::CreateShardMessage;
    use crossbeam::channel::bounded;

    fn msg(shard: u64) -> Message {
        Message::CreateShard(CreateShardMessage {
            index: "i".into(),
            field: "f".into(),
            view: "v".into(),
            shard,
        })
    }

    #[test]
    fn channel_broadcaster_delivers_then_times_out_when_full() {
        let (tx, rx) = bounded(1);
        let b = ChannelBroadcaster::new(tx, Duration::from_millis(5));
        b.send_sync(&msg(1)).unwrap();
        assert!(matches!(
            b.send_sync(&msg(2)),
            Err(BroadcastError::Timeout(_))
        ));
        assert_eq!(rx.try_recv().unwrap().shard(), 1);
    }

    #[test]
    fn channel_broadcaster_reports_disconnect() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let b = ChannelBroadcaster::new(tx, Duration::from_millis(5));
        assert!(matches!(
            b.send_sync(&msg(1)),
            Err(BroadcastError::Disconnected)
        ));
    }
}
