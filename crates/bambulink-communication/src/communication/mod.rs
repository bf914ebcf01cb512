//! Host-facing serial communication
//!
//! - `protocol`: Marlin line framing and resend handling
//! - `queue`: blocking line queues between host and worker
//! - `session`: per-port worker state
//! - `transport`: the [`VirtualSerial`] handle
//! - `bridge`: TCP access to a virtual port

pub mod bridge;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;

pub use bridge::{handle_connection, serve, PORT_BUSY_REPLY};
pub use protocol::{checksum, frame, Inbound, LineProtocol, Rejection};
pub use queue::{LineQueue, Popped};
pub use session::{SerialSession, SessionConfig, SessionState};
pub use transport::{ReadOutcome, VirtualSerial, SERIAL_LOG_TARGET};
