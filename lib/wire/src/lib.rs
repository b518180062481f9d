//! Wire formats shared by every node in the stack: Ethernet framing, the packet
//! prefix (header, timestamps, coordinates, auth fields), the keyed MAC, and the
//! application-level `Message` encoding carried as a packet's payload.

pub mod error;
pub mod ethernet;
pub mod logging;
pub mod mac;
pub mod message;
pub mod packet;
pub mod time;

pub use error::{ErrorUtils, WireError, WireResult};
pub use ethernet::Address;
pub use message::Message;
pub use packet::{AuthFields, Coordinates, Header, PacketPrefix, TimestampFields};
