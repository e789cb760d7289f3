//! huddle-session: the live side of the real-time core.
//! Transport (WebSocket connector), session manager with reconnect/backoff,
//! message dispatcher and the shared task progress tracker.

pub mod dispatcher;
pub mod progress;
pub mod session;
pub mod transport;

pub use dispatcher::{Dispatcher, HandlerId};
pub use progress::TaskProgressTracker;
pub use session::{LogoutHook, SessionConfig, SessionManager};
pub use transport::{AuthMode, Connector, Link, LinkEvent, TransportError, WsConnector};

pub use huddle_core::{ConnectionState, Credential, Message};
