use std::fmt::Debug;

use pumice::vk;

use super::{
    marker::{ResourceMarker, TypeOption},
    order::ExeOrderIndex,
    range::SubRange,
};
use crate::registry::TaskHandle;

/// How a unit of work touches a resource.
///
/// `layout` is ignored for buffers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Usage {
    pub stages: vk::PipelineStageFlags2KHR,
    pub access: vk::AccessFlags2KHR,
    pub layout: vk::ImageLayout,
}

impl Usage {
    pub const fn new(
        stages: vk::PipelineStageFlags2KHR,
        access: vk::AccessFlags2KHR,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            stages,
            access,
            layout,
        }
    }
    pub fn is_write(&self) -> bool {
        self.access.contains_write()
    }
}

/// Common usages, see [`AccessKind::usage`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessKind {
    TransferRead,
    TransferWrite,
    /// Sampled or read as storage from the given shader stages.
    ShaderRead(vk::PipelineStageFlags2KHR),
    /// Written as storage from the given shader stages.
    ShaderWrite(vk::PipelineStageFlags2KHR),
    ColorAttachmentWrite,
    DepthStencilAttachmentWrite,
    VertexBufferRead,
    IndexBufferRead,
    UniformRead(vk::PipelineStageFlags2KHR),
    IndirectRead,
    Present,
}

impl AccessKind {
    pub fn usage(self) -> Usage {
        use vk::AccessFlags2KHR as A;
        use vk::ImageLayout as L;
        use vk::PipelineStageFlags2KHR as S;

        match self {
            AccessKind::TransferRead => {
                Usage::new(S::TRANSFER, A::TRANSFER_READ, L::TRANSFER_SRC_OPTIMAL)
            }
            AccessKind::TransferWrite => {
                Usage::new(S::TRANSFER, A::TRANSFER_WRITE, L::TRANSFER_DST_OPTIMAL)
            }
            AccessKind::ShaderRead(stages) => {
                Usage::new(stages, A::SHADER_READ, L::SHADER_READ_ONLY_OPTIMAL)
            }
            AccessKind::ShaderWrite(stages) => {
                Usage::new(stages, A::SHADER_STORAGE_WRITE, L::GENERAL)
            }
            AccessKind::ColorAttachmentWrite => Usage::new(
                S::COLOR_ATTACHMENT_OUTPUT,
                A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
                L::COLOR_ATTACHMENT_OPTIMAL,
            ),
            AccessKind::DepthStencilAttachmentWrite => Usage::new(
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            AccessKind::VertexBufferRead => Usage::new(
                S::VERTEX_ATTRIBUTE_INPUT,
                A::VERTEX_ATTRIBUTE_READ,
                L::UNDEFINED,
            ),
            AccessKind::IndexBufferRead => {
                Usage::new(S::INDEX_INPUT, A::INDEX_READ, L::UNDEFINED)
            }
            AccessKind::UniformRead(stages) => Usage::new(stages, A::UNIFORM_READ, L::UNDEFINED),
            AccessKind::IndirectRead => Usage::new(
                S::DRAW_INDIRECT,
                A::INDIRECT_COMMAND_READ,
                L::UNDEFINED,
            ),
            // presentation engine waits on a semaphore, the barrier only needs the layout
            AccessKind::Present => Usage::new(S::empty(), A::empty(), L::PRESENT_SRC_KHR),
        }
    }
}

impl From<AccessKind> for Usage {
    fn from(value: AccessKind) -> Self {
        value.usage()
    }
}

/// The unit of work behind an access and the queue family it executes on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Producer {
    pub task: TaskHandle,
    pub queue_family: u32,
}

/// State of one linear interval of a resource.
///
/// `stages` and `access` accumulate every access since the last modification, a later write
/// has to wait for all of them. The modification itself (a write, or the layout transition
/// of a read) is kept in `write_stages` and `write_access` until the next one, together
/// with the `visible_*` scopes it has already been made visible to.
pub struct StateRecord<M: ResourceMarker> {
    pub range: SubRange,
    pub stages: vk::PipelineStageFlags2KHR,
    pub access: vk::AccessFlags2KHR,
    pub write_stages: vk::PipelineStageFlags2KHR,
    pub write_access: vk::AccessFlags2KHR,
    pub visible_stages: vk::PipelineStageFlags2KHR,
    pub visible_access: vk::AccessFlags2KHR,
    pub layout: M::IfImage<vk::ImageLayout>,
    pub index: ExeOrderIndex,
    pub producer: Option<Producer>,
}

impl<M: ResourceMarker> StateRecord<M> {
    /// Whether both records would behave the same for any future access.
    pub fn same_state(&self, other: &Self) -> bool {
        self.stages == other.stages
            && self.access == other.access
            && self.write_stages == other.write_stages
            && self.write_access == other.write_access
            && self.visible_stages == other.visible_stages
            && self.visible_access == other.visible_access
            && self.layout == other.layout
            && self.index == other.index
            && self.producer == other.producer
    }
    /// Whether there is a modification later accesses have to synchronize against.
    pub fn is_modified(&self) -> bool {
        !self.write_stages.is_empty() || !self.write_access.is_empty()
    }
    /// Whether the last modification was already made visible to `usage`.
    pub fn is_visible_to(&self, usage: &Usage) -> bool {
        self.visible_stages.contains(usage.stages) && self.visible_access.contains(usage.access)
    }
    pub fn with_range(&self, range: SubRange) -> Self {
        Self { range, ..*self }
    }
    pub fn layout_or_undefined(&self) -> vk::ImageLayout {
        self.layout.unwrap_or(vk::ImageLayout::UNDEFINED)
    }
}

impl<M: ResourceMarker> Clone for StateRecord<M> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<M: ResourceMarker> Copy for StateRecord<M> {}

impl<M: ResourceMarker> PartialEq for StateRecord<M> {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range && self.same_state(other)
    }
}

impl<M: ResourceMarker> Debug for StateRecord<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRecord")
            .field("range", &self.range)
            .field("stages", &self.stages)
            .field("access", &self.access)
            .field("write_stages", &self.write_stages)
            .field("write_access", &self.write_access)
            .field("visible_stages", &self.visible_stages)
            .field("visible_access", &self.visible_access)
            .field("layout", &self.layout)
            .field("index", &self.index)
            .field("producer", &self.producer)
            .finish()
    }
}

/// An access declared by the graph layer, not yet applied to a tracker.
pub struct PendingAccess<M: ResourceMarker> {
    pub range: M::Range,
    pub usage: Usage,
    pub index: ExeOrderIndex,
    pub producer: Option<Producer>,
}

impl<M: ResourceMarker> Clone for PendingAccess<M> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<M: ResourceMarker> Copy for PendingAccess<M> {}

impl<M: ResourceMarker> Debug for PendingAccess<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAccess")
            .field("range", &self.range)
            .field("usage", &self.usage)
            .field("index", &self.index)
            .field("producer", &self.producer)
            .finish()
    }
}

/// What survives of a resource between sessions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PersistentState {
    pub stages: vk::PipelineStageFlags2KHR,
    pub access: vk::AccessFlags2KHR,
    pub layout: vk::ImageLayout,
    pub last_producer: Option<Producer>,
}

impl PersistentState {
    pub fn new(layout: vk::ImageLayout) -> Self {
        Self {
            stages: vk::PipelineStageFlags2KHR::empty(),
            access: vk::AccessFlags2KHR::empty(),
            layout,
            last_producer: None,
        }
    }
    pub fn owning_family(&self) -> Option<u32> {
        self.last_producer.map(|p| p.queue_family)
    }
    /// Whether the next session has to make the contents visible before using them.
    pub fn is_written(&self) -> bool {
        self.access.contains_write()
    }
}

impl Default for PersistentState {
    fn default() -> Self {
        Self::new(vk::ImageLayout::UNDEFINED)
    }
}

#[test]
fn test_access_kind_usage() {
    let usage = AccessKind::TransferWrite.usage();
    assert!(usage.is_write());
    assert_eq!(usage.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

    let usage: Usage = AccessKind::ShaderRead(vk::PipelineStageFlags2KHR::FRAGMENT_SHADER).into();
    assert!(!usage.is_write());
    assert_eq!(usage.stages, vk::PipelineStageFlags2KHR::FRAGMENT_SHADER);
}
