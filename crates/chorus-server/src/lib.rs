pub mod assets;
pub mod registry;
pub mod relay;
pub mod server;
pub mod ws;

pub use registry::{ConnectionId, ConnectionRegistry, ConnectionState, RelayConnection};
pub use relay::{RelayEngine, RelayMode};
pub use server::{build_router, start, AppState, ServerConfig, ServerError, ServerHandle};
