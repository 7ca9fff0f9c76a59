//! The RESP wire protocol: inline and multi-bulk request framing (spec.md §6),
//! and reply encoding.

mod frame;
mod reply;

pub use frame::{FrameError, ParseOutcome, RespFrame, try_parse_request};
pub use reply::Reply;
