use parking_lot::RwLock;
use pumice::vk;

use crate::{
    arena::SharedPool,
    tracing::shim_macros::debug,
    tracking::{
        order::{ExeOrderIndex, OrderCounter},
        state::{PersistentState, Producer},
    },
};

crate::simple_handle! { pub ResourceHandle, pub TaskHandle }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ImageDesc {
    pub raw: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// Layout the image is returned to at the end of every session, `UNDEFINED` if it
    /// should stay in whatever layout it was last used in.
    pub default_layout: vk::ImageLayout,
    /// Created with `VK_SHARING_MODE_CONCURRENT`, no ownership transfers are needed.
    pub concurrent: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferDesc {
    pub raw: vk::Buffer,
    pub size: u64,
    pub concurrent: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceDesc {
    Image(ImageDesc),
    Buffer(BufferDesc),
}

struct ResourceEntry {
    desc: ResourceDesc,
    state: PersistentState,
}

/// Resources known to the tracking machinery together with the state they were left in by
/// the last session that used them.
pub struct ResourceRegistry {
    entries: SharedPool<RwLock<Option<ResourceEntry>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::with_chunk_size(64)
    }
    pub fn with_chunk_size(chunk_size: u32) -> Self {
        Self {
            entries: SharedPool::new(chunk_size),
        }
    }
    pub fn register_image(&self, desc: ImageDesc) -> ResourceHandle {
        assert!(desc.mip_levels > 0 && desc.array_layers > 0);
        self.register(ResourceDesc::Image(desc))
    }
    pub fn register_buffer(&self, desc: BufferDesc) -> ResourceHandle {
        assert!(desc.size > 0);
        self.register(ResourceDesc::Buffer(desc))
    }
    fn register(&self, desc: ResourceDesc) -> ResourceHandle {
        let handle = self.entries.allocate();
        *self.entries.get(handle).write() = Some(ResourceEntry {
            desc,
            state: PersistentState::default(),
        });

        let resource = ResourceHandle::from_handle(handle);
        debug!("Registered {:?} as {:?}", desc, resource);
        resource
    }
    pub fn release(&self, resource: ResourceHandle) {
        let handle = resource.handle();
        let previous = self.entries.get(handle).write().take();
        debug_assert!(previous.is_some(), "{resource:?} released twice");
        self.entries.release(handle);
    }
    // released slots hold `None`, so lookups don't need the pool's occupancy lock
    fn with_entry<R>(
        &self,
        resource: ResourceHandle,
        fun: impl FnOnce(&ResourceEntry) -> R,
    ) -> Option<R> {
        self.entries.try_get(resource.handle())?.read().as_ref().map(fun)
    }
    pub fn desc(&self, resource: ResourceHandle) -> Option<ResourceDesc> {
        self.with_entry(resource, |e| e.desc)
    }
    pub fn persistent_state(&self, resource: ResourceHandle) -> Option<PersistentState> {
        self.with_entry(resource, |e| e.state)
    }
    pub fn store_state(&self, resource: ResourceHandle, state: PersistentState) {
        let mut slot = self.entries.try_get(resource.handle()).map(RwLock::write);
        match slot.as_deref_mut().and_then(Option::as_mut) {
            Some(entry) => entry.state = state,
            None => panic!("Storing state of released {resource:?}"),
        }
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct TaskEntry {
    name: String,
    queue_family: u32,
    order: ExeOrderIndex,
}

/// Units of work in the order they were submitted, registering a task fixes its
/// [`ExeOrderIndex`].
pub struct TaskRegistry {
    tasks: SharedPool<RwLock<Option<TaskEntry>>>,
    counter: OrderCounter,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: SharedPool::new(256),
            counter: OrderCounter::new(),
        }
    }
    pub fn register(&self, name: impl Into<String>, queue_family: u32) -> TaskHandle {
        let handle = self.tasks.allocate();
        let order = self.counter.next();
        let name = name.into();

        debug!("Task {:?} at {:?} on queue family {}", name, order, queue_family);
        *self.tasks.get(handle).write() = Some(TaskEntry {
            name,
            queue_family,
            order,
        });
        TaskHandle::from_handle(handle)
    }
    pub fn release(&self, task: TaskHandle) {
        let handle = task.handle();
        let previous = self.tasks.get(handle).write().take();
        debug_assert!(previous.is_some(), "{task:?} released twice");
        self.tasks.release(handle);
    }
    /// A fresh index ordered after every task registered so far, for ending sessions.
    pub fn next_index(&self) -> ExeOrderIndex {
        self.counter.next()
    }
    fn with_entry<R>(&self, task: TaskHandle, fun: impl FnOnce(&TaskEntry) -> R) -> Option<R> {
        self.tasks.try_get(task.handle())?.read().as_ref().map(fun)
    }
    pub fn order(&self, task: TaskHandle) -> Option<ExeOrderIndex> {
        self.with_entry(task, |e| e.order)
    }
    pub fn queue_family(&self, task: TaskHandle) -> Option<u32> {
        self.with_entry(task, |e| e.queue_family)
    }
    pub fn name(&self, task: TaskHandle) -> Option<String> {
        self.with_entry(task, |e| e.name.clone())
    }
    pub fn producer(&self, task: TaskHandle) -> Option<Producer> {
        self.with_entry(task, |e| Producer {
            task,
            queue_family: e.queue_family,
        })
    }
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
