pub mod barrier;
pub mod local;
pub mod marker;
pub mod order;
pub mod range;
pub mod state;

pub use barrier::{
    BarrierDescriptor, BarrierKind, BarrierManager, BarrierSink, BarrierTarget, FlushError,
};
pub use local::LocalTracker;
pub use marker::{BufferMarker, ImageMarker, ResourceMarker};
pub use order::{ExeOrderIndex, OrderCounter};
pub use range::{BufferRange, ImageRange, SubRange};
pub use state::{AccessKind, PendingAccess, PersistentState, Producer, StateRecord, Usage};
