//! RFC 6455 frame engine: an incremental, resumable parser turning an
//! arbitrarily-chunked byte stream into decoded messages, and the encoder
//! writing frame headers for outgoing payloads.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod reader;

pub use codec::{MessageDispatcher, MessageKind, WsCodec};
pub use error::{ProtocolError, WsError};
pub use frame::{OpCode, write_header};
pub use message::{WsMessage, WsResponse};
pub use reader::{FrameReader, ReadProgress};
