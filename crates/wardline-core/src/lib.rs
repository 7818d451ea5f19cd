pub mod calls;
pub mod errors;
pub mod ids;
pub mod requests;
pub mod stream;
pub mod turns;

pub use calls::FunctionCall;
pub use errors::RelayError;
pub use ids::{CallId, RequestId, SessionId};
pub use requests::{AssistanceRequest, Department, Priority, RequestFilter, RequestStatus};
pub use stream::{ChatEvent, StreamFragment};
pub use turns::{Role, Turn};
