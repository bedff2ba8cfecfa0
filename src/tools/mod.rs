pub mod executor;
pub mod fetch;
pub mod filesystem;
pub mod notify;
pub mod registry;
pub mod schema;

#[cfg(feature = "browser")]
pub mod browser;

pub use executor::{CapabilityExecutor, CapabilityResult, InvocationOutcome};
pub use fetch::FetchPageTool;
pub use filesystem::{ListDirectoryTool, ReadFileTool, SafeFs, WriteFileTool};
pub use notify::PushNotificationTool;
pub use registry::{Capability, CapabilityInvocation, CapabilityRegistry, CapabilitySpec};
pub use schema::invocation_schema_json;

#[cfg(feature = "browser")]
pub use browser::BrowserTool;
