#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Session core of the Verse message plane: the command codec, the inbound/outbound queues,
//! packet history/retransmission, the session and its registry, and the stream loop that ties
//! them to a transport. See `SPEC_FULL.md` at the workspace root for the full specification this
//! crate implements.

pub mod alloc;
pub mod api;
pub mod buffer;
pub mod codec;
pub mod command;
pub mod defaults;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod fake;
pub mod frame;
pub mod history;
pub mod inbound;
pub mod outbound;
pub mod registry;
pub mod session;
pub mod stream;
pub mod wire;

pub use command::{Address, AddressKey, Command};
pub use error::{CoreError, CoreResult};
pub use session::{Session, SessionId};
