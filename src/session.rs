use pumice::vk;
use smallvec::SmallVec;

use crate::{
    registry::{ResourceDesc, ResourceHandle, ResourceRegistry, TaskHandle, TaskRegistry},
    tracing::shim_macros::{debug, info, warn},
    tracking::{
        barrier::{BarrierDescriptor, BarrierManager, BarrierSink, FlushError},
        local::LocalTracker,
        marker::{BufferMarker, ImageMarker, ResourceMarker},
        order::ExeOrderIndex,
        range::{BufferRange, ImageRange},
        state::{PendingAccess, PersistentState, Producer, StateRecord, Usage},
    },
    util::constant_ahash_hashmap,
};

#[derive(Clone, Debug, Default)]
pub struct SessionCreateInfo {
    /// Queue family the command buffer being built will be submitted to.
    pub queue_family: u32,
    pub label: String,
}

/// The part of a resource an access touches.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceRange {
    Whole,
    Image(ImageRange),
    Buffer(BufferRange),
}

impl From<ImageRange> for ResourceRange {
    fn from(value: ImageRange) -> Self {
        ResourceRange::Image(value)
    }
}

impl From<BufferRange> for ResourceRange {
    fn from(value: BufferRange) -> Self {
        ResourceRange::Buffer(value)
    }
}

enum ResourceTracker {
    Image(LocalTracker<ImageMarker>),
    Buffer(LocalTracker<BufferMarker>),
}

impl ResourceTracker {
    fn reset_state(
        &mut self,
        final_index: ExeOrderIndex,
        barriers: &mut BarrierManager,
    ) -> PersistentState {
        match self {
            ResourceTracker::Image(tracker) => tracker.reset_state(final_index, barriers),
            ResourceTracker::Buffer(tracker) => tracker.reset_state(final_index, barriers),
        }
    }
    fn collapse(&mut self) -> PersistentState {
        match self {
            ResourceTracker::Image(tracker) => tracker.collapse(),
            ResourceTracker::Buffer(tracker) => tracker.collapse(),
        }
    }
}

pub enum SessionRecords<'a> {
    Image(&'a [StateRecord<ImageMarker>]),
    Buffer(&'a [StateRecord<BufferMarker>]),
}

impl SessionRecords<'_> {
    pub fn len(&self) -> usize {
        match self {
            SessionRecords::Image(records) => records.len(),
            SessionRecords::Buffer(records) => records.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Context for building one command buffer on one queue.
///
/// Every resource gets a [`LocalTracker`] seeded from the registry the first time it is
/// accessed, its state is written back when the resource is ended, the session finished or
/// dropped.
pub struct Session<'a> {
    resources: &'a ResourceRegistry,
    tasks: &'a TaskRegistry,
    info: SessionCreateInfo,
    trackers: ahash::HashMap<ResourceHandle, ResourceTracker>,
    barriers: BarrierManager,
    semaphore_waits: SmallVec<[TaskHandle; 4]>,
}

impl<'a> Session<'a> {
    pub fn new(
        resources: &'a ResourceRegistry,
        tasks: &'a TaskRegistry,
        info: SessionCreateInfo,
    ) -> Self {
        debug!(
            "Session '{}' on queue family {}",
            info.label, info.queue_family
        );
        Self {
            resources,
            tasks,
            info,
            trackers: constant_ahash_hashmap(),
            barriers: BarrierManager::new(),
            semaphore_waits: SmallVec::new(),
        }
    }
    pub fn queue_family(&self) -> u32 {
        self.info.queue_family
    }
    pub fn label(&self) -> &str {
        &self.info.label
    }
    fn tracker(&mut self, resource: ResourceHandle) -> &mut ResourceTracker {
        let resources = self.resources;
        self.trackers.entry(resource).or_insert_with(|| {
            let (Some(desc), Some(state)) =
                (resources.desc(resource), resources.persistent_state(resource))
            else {
                panic!("{resource:?} is not registered");
            };

            match desc {
                ResourceDesc::Image(desc) => {
                    ResourceTracker::Image(LocalTracker::for_image(resource, &desc, &state))
                }
                ResourceDesc::Buffer(desc) => {
                    ResourceTracker::Buffer(LocalTracker::for_buffer(resource, &desc, &state))
                }
            }
        })
    }
    fn add_wait(&mut self, task: TaskHandle) {
        if !self.semaphore_waits.contains(&task) {
            self.semaphore_waits.push(task);
        }
    }
    /// Declares that `task` accesses `range` of `resource` with `usage` and returns the
    /// barriers this required, they are also queued for the next [`Session::flush`].
    pub fn declare_access(
        &mut self,
        resource: ResourceHandle,
        range: impl Into<ResourceRange>,
        usage: impl Into<Usage>,
        task: TaskHandle,
    ) -> SmallVec<[BarrierDescriptor; 4]> {
        let range = range.into();
        let usage = usage.into();
        let (Some(index), Some(producer)) = (self.tasks.order(task), self.tasks.producer(task))
        else {
            panic!("{task:?} is not registered");
        };
        assert_eq!(
            producer.queue_family, self.info.queue_family,
            "{task:?} doesn't execute on the queue family of session '{}'",
            self.info.label
        );

        fn pending<M: ResourceMarker>(
            range: M::Range,
            usage: Usage,
            index: ExeOrderIndex,
            producer: Producer,
        ) -> PendingAccess<M> {
            PendingAccess {
                range,
                usage,
                index,
                producer: Some(producer),
            }
        }

        let mut out: SmallVec<[BarrierDescriptor; 4]> = SmallVec::new();
        match (self.tracker(resource), range) {
            (ResourceTracker::Image(tracker), ResourceRange::Whole) => {
                let whole = ImageMarker::whole_range(tracker.extent());
                tracker.commit(&pending::<ImageMarker>(whole, usage, index, producer), &mut out);
            }
            (ResourceTracker::Image(tracker), ResourceRange::Image(range)) => {
                tracker.commit(&pending::<ImageMarker>(range, usage, index, producer), &mut out);
            }
            (ResourceTracker::Buffer(tracker), ResourceRange::Whole) => {
                let whole = BufferMarker::whole_range(tracker.extent());
                tracker.commit(&pending::<BufferMarker>(whole, usage, index, producer), &mut out);
            }
            (ResourceTracker::Buffer(tracker), ResourceRange::Buffer(range)) => {
                tracker.commit(&pending::<BufferMarker>(range, usage, index, producer), &mut out);
            }
            (_, range) => panic!("{range:?} doesn't match the kind of {resource:?}"),
        }

        for descriptor in &out {
            if let Some(wait) = descriptor.wait {
                self.add_wait(wait);
            }
        }
        self.barriers.extend(out.iter().copied());
        out
    }
    /// Declares that `consumer` depends on `producer` even without a shared resource.
    pub fn add_dependency(&mut self, consumer: TaskHandle, producer: TaskHandle) {
        let (Some(consumer_index), Some(producer_index)) =
            (self.tasks.order(consumer), self.tasks.order(producer))
        else {
            panic!("Dependency between unregistered tasks {producer:?} -> {consumer:?}");
        };
        assert!(
            producer_index < consumer_index,
            "{:?} at {:?} can't depend on the later {:?} at {:?}",
            consumer,
            consumer_index,
            producer,
            producer_index
        );

        if self.tasks.queue_family(producer) != self.tasks.queue_family(consumer) {
            self.add_wait(producer);
        }
    }
    /// Resets the tracker of `resource`, queueing the barriers returning it to its default
    /// layout, and writes its state back into the registry.
    pub fn end_resource(
        &mut self,
        resource: ResourceHandle,
        final_index: ExeOrderIndex,
    ) -> Option<PersistentState> {
        let mut tracker = self.trackers.remove(&resource)?;
        let state = tracker.reset_state(final_index, &mut self.barriers);
        self.resources.store_state(resource, state);
        Some(state)
    }
    /// Records of a resource accessed in this session.
    pub fn records(&self, resource: ResourceHandle) -> Option<SessionRecords<'_>> {
        self.trackers.get(&resource).map(|tracker| match tracker {
            ResourceTracker::Image(tracker) => SessionRecords::Image(tracker.records()),
            ResourceTracker::Buffer(tracker) => SessionRecords::Buffer(tracker.records()),
        })
    }
    /// Tasks on other queues whose completion semaphores the submission must wait on.
    pub fn semaphore_waits(&self) -> &[TaskHandle] {
        &self.semaphore_waits
    }
    pub fn pending_barriers(&self) -> &[BarrierDescriptor] {
        self.barriers.pending()
    }
    pub fn flush<S: BarrierSink + ?Sized>(
        &mut self,
        sink: &S,
        command_buffer: vk::CommandBuffer,
    ) -> Result<usize, FlushError> {
        self.barriers.flush(sink, command_buffer)
    }
    /// Ends every resource still tracked, the barriers this produces still need a flush.
    pub fn finish(&mut self, final_index: ExeOrderIndex) {
        let mut resources = self.trackers.keys().copied().collect::<Vec<_>>();
        resources.sort();
        for resource in resources {
            self.end_resource(resource, final_index);
        }
        info!(
            "Session '{}' finished with {} pending barriers",
            self.info.label,
            self.barriers.len()
        );
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.barriers.is_empty() {
            warn!(
                "Session '{}' dropped with {} barriers that were never flushed",
                self.info.label,
                self.barriers.len()
            );
        }
        // nothing can be recorded anymore, keep the state as it is
        for (resource, mut tracker) in self.trackers.drain() {
            self.resources.store_state(resource, tracker.collapse());
        }
    }
}

#[cfg(test)]
mod tests {
    use pumice::util::ObjectHandle;
    use rayon::prelude::*;

    use super::*;
    use crate::{
        registry::{BufferDesc, ImageDesc},
        tracing::{subscriber::install_tracing_subscriber, Severity},
        tracking::{
            barrier::{
                tests::{fake_command_buffer, RecordingSink},
                BarrierKind,
            },
            state::AccessKind,
        },
    };

    fn array_image(resources: &ResourceRegistry, raw: u64) -> ResourceHandle {
        resources.register_image(ImageDesc {
            raw: vk::Image::from_raw(raw),
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 11,
            array_layers: 8,
            default_layout: vk::ImageLayout::UNDEFINED,
            concurrent: false,
        })
    }

    fn session<'a>(
        resources: &'a ResourceRegistry,
        tasks: &'a TaskRegistry,
        queue_family: u32,
    ) -> Session<'a> {
        Session::new(
            resources,
            tasks,
            SessionCreateInfo {
                queue_family,
                label: format!("queue {queue_family}"),
            },
        )
    }

    #[test]
    fn test_declare_and_flush() {
        let resources = ResourceRegistry::new();
        let tasks = TaskRegistry::new();
        let image = array_image(&resources, 1);

        let mut session = session(&resources, &tasks, 0);
        let copy = tasks.register("copy", 0);
        let barriers = session.declare_access(
            image,
            ImageRange::new(0, 1, 0, 2),
            AccessKind::TransferWrite,
            copy,
        );
        assert_eq!(barriers.len(), 1);

        let Some(SessionRecords::Image(records)) = session.records(image) else {
            panic!("image is tracked as an image")
        };
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].range.begin, records[0].range.end), (0, 2));
        assert_eq!((records[1].range.begin, records[1].range.end), (2, 88));

        let sink = RecordingSink::default();
        assert_eq!(session.flush(&sink, fake_command_buffer()), Ok(1));
        assert_eq!(sink.calls.borrow().len(), 1);
        assert!(session.pending_barriers().is_empty());
    }

    #[test]
    fn test_reset_between_sessions() {
        let resources = ResourceRegistry::new();
        let tasks = TaskRegistry::new();
        let image = array_image(&resources, 1);

        {
            let mut session = session(&resources, &tasks, 0);
            let task = tasks.register("fragmenting", 0);
            for level in 0..11 {
                session.declare_access(
                    image,
                    ImageRange::new(level, 1, level % 8, 1),
                    AccessKind::ShaderWrite(vk::PipelineStageFlags2KHR::COMPUTE_SHADER),
                    task,
                );
            }
            assert!(session.records(image).unwrap().len() > 11);

            session.finish(tasks.next_index());
            assert!(session.records(image).is_none());
            let sink = RecordingSink::default();
            session.flush(&sink, fake_command_buffer()).unwrap();
        }

        let state = resources.persistent_state(image).unwrap();
        assert_eq!(state.layout, vk::ImageLayout::GENERAL);

        let mut session = session(&resources, &tasks, 0);
        let task = tasks.register("read", 0);
        session.declare_access(
            image,
            ImageRange::new(0, 1, 0, 1),
            AccessKind::ShaderRead(vk::PipelineStageFlags2KHR::FRAGMENT_SHADER),
            task,
        );
        let Some(SessionRecords::Image(records)) = session.records(image) else {
            panic!("image is tracked as an image")
        };
        // only the first subresource was touched, the rest is the whole previous session
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].index, ExeOrderIndex::INITIAL);
        assert_eq!(records[1].range.end, 88);
    }

    #[test]
    fn test_finish_at_final_sentinel() {
        let resources = ResourceRegistry::new();
        let tasks = TaskRegistry::new();
        let texture = resources.register_image(ImageDesc {
            raw: vk::Image::from_raw(2),
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 4,
            array_layers: 1,
            default_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            concurrent: false,
        });

        let mut session = session(&resources, &tasks, 0);
        let upload = tasks.register("upload", 0);
        session.declare_access(
            texture,
            ImageRange::new(1, 2, 0, 1),
            AccessKind::TransferWrite,
            upload,
        );
        session.finish(ExeOrderIndex::FINAL);

        let pending = session.pending_barriers();
        assert!(pending.iter().any(|b| b.range.begin == 1
            && b.range.end == 3
            && b.old_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL
            && b.new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));

        let sink = RecordingSink::default();
        session.flush(&sink, fake_command_buffer()).unwrap();
        assert_eq!(
            resources.persistent_state(texture).unwrap().layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_drop_writes_back_state() {
        let resources = ResourceRegistry::new();
        let tasks = TaskRegistry::new();
        let buffer = resources.register_buffer(BufferDesc {
            raw: vk::Buffer::from_raw(3),
            size: 1024,
            concurrent: false,
        });

        {
            let mut session = session(&resources, &tasks, 0);
            let task = tasks.register("fill", 0);
            session.declare_access(buffer, ResourceRange::Whole, AccessKind::TransferWrite, task);
        }

        let state = resources.persistent_state(buffer).unwrap();
        assert_eq!(state.access, vk::AccessFlags2KHR::MEMORY_WRITE);
        assert_eq!(state.owning_family(), Some(0));
    }

    #[test]
    fn test_cross_queue_handoff() {
        let resources = ResourceRegistry::new();
        let tasks = TaskRegistry::new();
        let buffer = resources.register_buffer(BufferDesc {
            raw: vk::Buffer::from_raw(3),
            size: 1024,
            concurrent: false,
        });

        let upload = tasks.register("upload", 1);
        {
            let mut transfer = session(&resources, &tasks, 1);
            transfer.declare_access(
                buffer,
                ResourceRange::Whole,
                AccessKind::TransferWrite,
                upload,
            );
            transfer.finish(tasks.next_index());
        }

        let mut graphics = session(&resources, &tasks, 0);
        let draw = tasks.register("draw", 0);
        graphics.add_dependency(draw, upload);
        let barriers = graphics.declare_access(
            buffer,
            BufferRange::new(0, 256),
            AccessKind::VertexBufferRead,
            draw,
        );

        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].kind, BarrierKind::Memory);
        assert_eq!(barriers[0].wait, Some(upload));
        assert_eq!((barriers[0].src_queue_family, barriers[0].dst_queue_family), (1, 0));
        assert_eq!(graphics.semaphore_waits(), &[upload]);
    }

    #[test]
    #[should_panic]
    fn test_dependency_on_later_task() {
        let resources = ResourceRegistry::new();
        let tasks = TaskRegistry::new();
        let mut session = session(&resources, &tasks, 0);

        let first = tasks.register("first", 0);
        let second = tasks.register("second", 0);
        session.add_dependency(first, second);
    }

    #[test]
    #[should_panic]
    fn test_mismatched_range_kind() {
        let resources = ResourceRegistry::new();
        let tasks = TaskRegistry::new();
        let image = array_image(&resources, 1);
        let mut session = session(&resources, &tasks, 0);
        let task = tasks.register("task", 0);
        session.declare_access(image, BufferRange::new(0, 4), AccessKind::TransferRead, task);
    }

    #[test]
    fn test_multi_worker_sessions() {
        install_tracing_subscriber(Some(Severity::Info));

        let resources = ResourceRegistry::with_chunk_size(4);
        let tasks = TaskRegistry::new();
        let images = (0..16)
            .map(|i| array_image(&resources, i + 1))
            .collect::<Vec<_>>();

        // every worker builds its own command buffer, nothing but the registries is shared
        let flushed = images
            .par_iter()
            .enumerate()
            .map(|(i, &image)| {
                let queue_family = (i % 2) as u32;
                let mut session = session(&resources, &tasks, queue_family);
                let task = tasks.register(format!("worker {i}"), queue_family);

                session.declare_access(
                    image,
                    ImageRange::new(0, 1, 0, 2),
                    AccessKind::TransferWrite,
                    task,
                );
                session.finish(tasks.next_index());

                let sink = RecordingSink::default();
                let count = session.flush(&sink, fake_command_buffer()).unwrap();
                assert_eq!(sink.calls.borrow().len(), 1);
                count
            })
            .sum::<usize>();

        // one write barrier and one GENERAL transition per untouched and written part
        assert_eq!(flushed, 16 * 3);

        for (i, &image) in images.iter().enumerate() {
            let state = resources.persistent_state(image).unwrap();
            assert_eq!(state.layout, vk::ImageLayout::GENERAL);
            assert_eq!(state.owning_family(), Some((i % 2) as u32));
        }
    }
}
