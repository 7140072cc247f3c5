pub mod lifecycle;
pub mod router;
pub mod server;

pub use lifecycle::{Daemon, DaemonConfig, LifecycleError, is_running};
pub use router::{Request, Response, Router, RpcError};
pub use server::{Client, Server, ServerError, ShutdownHandle, default_socket_path};
