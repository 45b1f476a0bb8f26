use thiserror::Error;

use crate::ChannelId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Work queue has been shut down")]
    ShutDown,
    #[error("Channel {0:?} was not created by this queue")]
    UnknownChannel(ChannelId),
    #[error("Work queue ran out of channel ids")]
    TooManyChannels,
    #[error("Failed to spawn worker threads: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
