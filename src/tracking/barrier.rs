use pumice::{util::ObjectHandle, vk, DeviceWrapper};

use super::range::SubRange;
use crate::{
    registry::{ResourceHandle, TaskHandle},
    tracing::shim_macros::{debug, trace},
    util::ffi_ptr::AsFFiPtr,
};

/// The raw object a barrier applies to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BarrierTarget {
    Image {
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        /// Array layer count of the whole image, needed to turn linear ranges back into
        /// subresource ranges.
        layers: u32,
    },
    Buffer {
        buffer: vk::Buffer,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BarrierKind {
    /// Only an execution dependency is needed, the contents are either not written or
    /// don't matter.
    Execution,
    /// Writes need to be made available or the layout or owning queue family changes.
    Memory,
}

/// A single transition of one linear interval of a resource.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BarrierDescriptor {
    pub resource: ResourceHandle,
    pub target: BarrierTarget,
    pub range: SubRange,
    pub src_stages: vk::PipelineStageFlags2KHR,
    pub src_access: vk::AccessFlags2KHR,
    pub dst_stages: vk::PipelineStageFlags2KHR,
    pub dst_access: vk::AccessFlags2KHR,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
    /// Task on another queue which must be waited for with a semaphore before this barrier.
    pub wait: Option<TaskHandle>,
    pub kind: BarrierKind,
}

impl BarrierDescriptor {
    pub fn is_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }
    pub fn is_ownership_transfer(&self) -> bool {
        self.src_queue_family != self.dst_queue_family
    }
    /// The release barrier to record on the source queue of an ownership transfer, the
    /// descriptor itself is the acquire half.
    pub fn release_half(&self) -> Option<BarrierDescriptor> {
        self.is_ownership_transfer().then(|| BarrierDescriptor {
            dst_stages: vk::PipelineStageFlags2KHR::empty(),
            dst_access: vk::AccessFlags2KHR::empty(),
            wait: None,
            ..*self
        })
    }
    fn to_vk_buffer(&self, buffer: vk::Buffer) -> vk::BufferMemoryBarrier2KHR {
        vk::BufferMemoryBarrier2KHR {
            src_stage_mask: self.src_stages,
            src_access_mask: self.src_access,
            dst_stage_mask: self.dst_stages,
            dst_access_mask: self.dst_access,
            src_queue_family_index: self.src_queue_family,
            dst_queue_family_index: self.dst_queue_family,
            buffer,
            offset: self.range.begin,
            size: self.range.len(),
            ..Default::default()
        }
    }
    fn to_vk_image(
        &self,
        image: vk::Image,
        subresource_range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier2KHR {
        vk::ImageMemoryBarrier2KHR {
            src_stage_mask: self.src_stages,
            src_access_mask: self.src_access,
            dst_stage_mask: self.dst_stages,
            dst_access_mask: self.dst_access,
            old_layout: self.old_layout,
            new_layout: self.new_layout,
            src_queue_family_index: self.src_queue_family,
            dst_queue_family_index: self.dst_queue_family,
            image,
            subresource_range,
            ..Default::default()
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FlushError {
    #[error("Cannot record {0} pending barriers into a null command buffer")]
    InvalidCommandBuffer(usize),
}

/// Something that can record a `vkCmdPipelineBarrier2KHR`.
pub trait BarrierSink {
    /// # Safety
    /// `command_buffer` must be in the recording state and the pointers in `dependency_info`
    /// valid for the duration of the call.
    unsafe fn pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        dependency_info: &vk::DependencyInfoKHR,
    );
}

impl BarrierSink for DeviceWrapper {
    unsafe fn pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        dependency_info: &vk::DependencyInfoKHR,
    ) {
        self.cmd_pipeline_barrier_2_khr(command_buffer, dependency_info);
    }
}

/// Collects barrier descriptors of many resources while a command buffer is built and
/// records them in one batched call.
#[derive(Default)]
pub struct BarrierManager {
    pending: Vec<BarrierDescriptor>,
    raw_image_barriers: Vec<vk::ImageMemoryBarrier2KHR>,
    raw_buffer_barriers: Vec<vk::BufferMemoryBarrier2KHR>,
}

impl BarrierManager {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, descriptor: BarrierDescriptor) {
        self.pending.push(descriptor);
    }
    pub fn pending(&self) -> &[BarrierDescriptor] {
        &self.pending
    }
    pub fn len(&self) -> usize {
        self.pending.len()
    }
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
    pub fn clear(&mut self) {
        self.pending.clear();
    }
    /// Records every descriptor added since the previous flush with a single
    /// `vkCmdPipelineBarrier2KHR` and returns how many were consumed.
    ///
    /// Execution only descriptors are folded into one global memory barrier. On error the
    /// pending descriptors are kept.
    pub fn flush<S: BarrierSink + ?Sized>(
        &mut self,
        sink: &S,
        command_buffer: vk::CommandBuffer,
    ) -> Result<usize, FlushError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        if command_buffer == vk::CommandBuffer::null() {
            return Err(FlushError::InvalidCommandBuffer(self.pending.len()));
        }

        self.raw_image_barriers.clear();
        self.raw_buffer_barriers.clear();

        let mut execution = vk::MemoryBarrier2KHR::default();
        for descriptor in &self.pending {
            match (descriptor.kind, descriptor.target) {
                (BarrierKind::Execution, _) => {
                    execution.src_stage_mask |= descriptor.src_stages;
                    execution.dst_stage_mask |= descriptor.dst_stages;
                }
                (BarrierKind::Memory, BarrierTarget::Image { image, aspect, layers }) => {
                    for rect in descriptor.range.to_image_ranges(layers) {
                        self.raw_image_barriers
                            .push(descriptor.to_vk_image(image, rect.to_vk(aspect)));
                    }
                }
                (BarrierKind::Memory, BarrierTarget::Buffer { buffer }) => {
                    self.raw_buffer_barriers.push(descriptor.to_vk_buffer(buffer));
                }
            }
        }

        let memory_barriers: &[vk::MemoryBarrier2KHR] = if execution.src_stage_mask.is_empty()
            && execution.dst_stage_mask.is_empty()
        {
            &[]
        } else {
            std::slice::from_ref(&execution)
        };

        let count = self.pending.len();
        if !(memory_barriers.is_empty()
            && self.raw_image_barriers.is_empty()
            && self.raw_buffer_barriers.is_empty())
        {
            trace!(
                "Flushing {} descriptors as {} memory, {} image and {} buffer barriers",
                count,
                memory_barriers.len(),
                self.raw_image_barriers.len(),
                self.raw_buffer_barriers.len()
            );

            unsafe {
                sink.pipeline_barrier(
                    command_buffer,
                    &vk::DependencyInfoKHR {
                        dependency_flags: vk::DependencyFlags::empty(),
                        memory_barrier_count: memory_barriers.ffi_len(),
                        p_memory_barriers: memory_barriers.as_ffi_ptr(),
                        buffer_memory_barrier_count: self.raw_buffer_barriers.ffi_len(),
                        p_buffer_memory_barriers: self.raw_buffer_barriers.as_ffi_ptr(),
                        image_memory_barrier_count: self.raw_image_barriers.ffi_len(),
                        p_image_memory_barriers: self.raw_image_barriers.as_ffi_ptr(),
                        ..Default::default()
                    },
                );
            }
        } else {
            debug!("{} descriptors needed no barrier", count);
        }

        self.pending.clear();
        Ok(count)
    }
}

impl Extend<BarrierDescriptor> for BarrierManager {
    fn extend<T: IntoIterator<Item = BarrierDescriptor>>(&mut self, iter: T) {
        self.pending.extend(iter);
    }
}
