//! Tool service access: transport, descriptor cache, invoker and policy gate.

pub mod dispatch;
pub mod invoker;
pub mod registry;
pub mod transport;

pub use dispatch::{DispatchRejection, ToolAccess, ToolDispatcher};
pub use invoker::{ToolInvocation, ToolInvoker};
pub use registry::ToolRegistry;
pub use transport::{HttpToolTransport, ToolTransport};
