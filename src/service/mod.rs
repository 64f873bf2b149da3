pub mod protocol;

pub use protocol::{parse_request, BridgeReply, BridgeRequest, ReplyStatus};
