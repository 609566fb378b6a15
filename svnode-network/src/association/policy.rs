//! Stream policies: which stream of an association carries each message.

use std::{fmt, sync::Arc};

use crate::protocol::external::{Command, StreamType};

/// Maps each message command to the stream that should carry it.
pub trait StreamPolicy: fmt::Debug + Send + Sync + 'static {
    /// The policy name used in `createstrm` and `protoconf`.
    fn name(&self) -> &'static str;

    /// Returns the stream that carries `command` messages.
    fn stream_for(&self, command: Command) -> StreamType;

    /// Returns every stream the policy uses, starting with
    /// [`StreamType::General`].
    fn streams(&self) -> &'static [StreamType];
}

/// Sends everything on the `GENERAL` stream.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultPolicy;

impl StreamPolicy for DefaultPolicy {
    fn name(&self) -> &'static str {
        "Default"
    }

    fn stream_for(&self, _command: Command) -> StreamType {
        StreamType::General
    }

    fn streams(&self) -> &'static [StreamType] {
        &[StreamType::General]
    }
}

/// Moves block propagation and latency probes to `DATA1`, so they don't queue
/// behind transaction traffic on `GENERAL`.
#[derive(Copy, Clone, Debug, Default)]
pub struct BlockPriorityPolicy;

impl StreamPolicy for BlockPriorityPolicy {
    fn name(&self) -> &'static str {
        "BlockPriority"
    }

    fn stream_for(&self, command: Command) -> StreamType {
        match command {
            Command::Block
            | Command::Ping
            | Command::Pong
            | Command::Headers
            | Command::GetHeaders => StreamType::Data1,
            _ => StreamType::General,
        }
    }

    fn streams(&self) -> &'static [StreamType] {
        &[StreamType::General, StreamType::Data1]
    }
}

/// Returns the policy called `name`, if there is one.
pub fn policy_by_name(name: &str) -> Option<Arc<dyn StreamPolicy>> {
    match name {
        "Default" => Some(Arc::new(DefaultPolicy)),
        "BlockPriority" => Some(Arc::new(BlockPriorityPolicy)),
        _ => None,
    }
}
