//! tether-protocol: Bootstrap artifacts and session wire protocol
//!
//! This crate defines everything that crosses the transport:
//! the handshake signature and session key, the compressed bootstrap
//! package and its manifest, the loader script that receives it on the
//! remote host, and the framed messages exchanged once both sides run a
//! session.

pub mod codec;
pub mod error;
pub mod frame;
pub mod loader;
pub mod mac;
pub mod message;
pub mod package;
pub mod request;
pub mod secret;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use loader::{LoaderScript, LoaderSpec};
pub use mac::{FrameMac, Side, TAG_LEN};
pub use message::{ErrorCode, Message, MessageType, PROTOCOL_VERSION};
pub use package::{BootstrapModule, BootstrapPackage, CompressedModule, Manifest, ManifestEntry};
pub use request::RequestId;
pub use secret::{HandshakeSignature, SessionKey, SIGNATURE_LEN};
