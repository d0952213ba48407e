use serde::{Deserialize, Serialize};

use crate::error::BroadcastError;

/// 某个 shard 的 fragment 已在本节点创建
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShardMessage {
    pub index: String,
    pub field: String,
    pub view: String,
    pub shard: u64,
}

/// 集群广播消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    CreateShard(CreateShardMessage),
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, BroadcastError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BroadcastError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn shard(&self) -> u64 {
        match self {
            Message::CreateShard(m) => m.shard,
        }
    }
}
