pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

pub use relay::StreamRelay;
pub use server::{start, ServerConfig, ServerHandle};
pub use session::SessionRegistry;
