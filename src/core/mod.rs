pub mod attr;
pub mod broadcast;
pub mod message;
pub mod options;

pub use attr::{AttrStore, AttrValue, Attrs, MemAttrStore};
pub use broadcast::{Broadcaster, ChannelBroadcaster, NopBroadcaster};
pub use message::{CreateShardMessage, Message};
pub use options::{
    shard_of, CacheType, FieldOptions, DEFAULT_CACHE_SIZE, DEFAULT_MAX_OP_N, SHARD_WIDTH,
    VIEW_STANDARD,
};
