pub mod arena;
pub mod registry;
pub mod session;
pub mod tracing;
pub mod tracking;
pub mod util;

pub use registry::{
    BufferDesc, ImageDesc, ResourceDesc, ResourceHandle, ResourceRegistry, TaskHandle,
    TaskRegistry,
};
pub use session::{ResourceRange, Session, SessionCreateInfo, SessionRecords};
