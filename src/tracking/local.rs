use pumice::vk;
use smallvec::SmallVec;

use super::{
    barrier::{BarrierDescriptor, BarrierKind, BarrierTarget},
    marker::{BufferMarker, ImageExtent, ImageMarker, ResourceMarker},
    order::ExeOrderIndex,
    range::SubRange,
    state::{PendingAccess, PersistentState, Producer, StateRecord, Usage},
};
use crate::{
    registry::{BufferDesc, ImageDesc, ResourceHandle},
    tracing::shim_macros::{trace, warn},
};

/// Access state of a single resource within one recording session.
///
/// The records are sorted and always partition the whole linearized subresource space of
/// the resource, every [`LocalTracker::commit`] splits the records it overlaps and may
/// produce barriers against the state it replaces.
pub struct LocalTracker<M: ResourceMarker> {
    resource: ResourceHandle,
    target: BarrierTarget,
    extent: M::Extent,
    concurrent: bool,
    default_layout: vk::ImageLayout,
    records: Vec<StateRecord<M>>,
    touched: bool,
}

impl LocalTracker<ImageMarker> {
    pub fn for_image(resource: ResourceHandle, desc: &ImageDesc, state: &PersistentState) -> Self {
        Self::new(
            resource,
            BarrierTarget::Image {
                image: desc.raw,
                aspect: desc.aspect,
                layers: desc.array_layers,
            },
            ImageExtent {
                levels: desc.mip_levels,
                layers: desc.array_layers,
            },
            desc.concurrent,
            desc.default_layout,
            state,
        )
    }
}

impl LocalTracker<BufferMarker> {
    pub fn for_buffer(
        resource: ResourceHandle,
        desc: &BufferDesc,
        state: &PersistentState,
    ) -> Self {
        Self::new(
            resource,
            BarrierTarget::Buffer { buffer: desc.raw },
            desc.size,
            desc.concurrent,
            vk::ImageLayout::UNDEFINED,
            state,
        )
    }
}

impl<M: ResourceMarker> LocalTracker<M> {
    pub fn new(
        resource: ResourceHandle,
        target: BarrierTarget,
        extent: M::Extent,
        concurrent: bool,
        default_layout: vk::ImageLayout,
        state: &PersistentState,
    ) -> Self {
        let total = M::total(&extent);
        assert!(total > 0, "{resource:?} has no subresources to track");

        let (write_stages, write_access) = if state.is_written() {
            (state.stages, state.access)
        } else {
            (vk::PipelineStageFlags2KHR::empty(), vk::AccessFlags2KHR::empty())
        };
        let seed = StateRecord {
            range: SubRange::new(0, total),
            stages: state.stages,
            access: state.access,
            write_stages,
            write_access,
            visible_stages: vk::PipelineStageFlags2KHR::empty(),
            visible_access: vk::AccessFlags2KHR::empty(),
            layout: M::when_image(|| state.layout),
            index: ExeOrderIndex::INITIAL,
            producer: state.last_producer,
        };

        Self {
            resource,
            target,
            extent,
            concurrent,
            default_layout,
            records: vec![seed],
            touched: false,
        }
    }
    pub fn resource(&self) -> ResourceHandle {
        self.resource
    }
    pub fn extent(&self) -> &M::Extent {
        &self.extent
    }
    pub fn records(&self) -> &[StateRecord<M>] {
        &self.records
    }
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
    /// Whether the records are sorted, non-empty and cover the resource without gaps or
    /// overlaps.
    pub fn check_partition(&self) -> bool {
        let mut next = 0;
        for record in &self.records {
            if record.range.begin != next || record.range.is_empty() {
                return false;
            }
            next = record.range.end;
        }
        next == M::total(&self.extent)
    }
    /// Applies `pending` to the records, appending the barriers it needs to `barriers`.
    pub fn commit(
        &mut self,
        pending: &PendingAccess<M>,
        barriers: &mut impl Extend<BarrierDescriptor>,
    ) {
        assert!(
            !pending.index.is_sentinel(),
            "Accesses can't be declared at the {:?} sentinel",
            pending.index
        );
        self.apply(pending, barriers);
    }
    /// [`LocalTracker::commit`] without the sentinel check, the session end uses `FINAL`.
    fn apply(&mut self, pending: &PendingAccess<M>, barriers: &mut impl Extend<BarrierDescriptor>) {
        let intervals = M::intervals(&pending.range, &self.extent);
        if intervals.is_empty() {
            return;
        }

        for interval in intervals {
            self.commit_interval(interval, pending, barriers);
        }
        self.touched = true;

        trace!(
            "{:?} committed {:?}, {} records",
            self.resource,
            pending,
            self.records.len()
        );
        debug_assert!(self.check_partition(), "{:?}", self.records);
    }
    fn commit_interval(
        &mut self,
        interval: SubRange,
        pending: &PendingAccess<M>,
        barriers: &mut impl Extend<BarrierDescriptor>,
    ) {
        let first = self
            .records
            .partition_point(|r| r.range.end <= interval.begin);

        let mut replacement: SmallVec<[StateRecord<M>; 8]> = SmallVec::new();
        let mut covered = interval.begin;
        let mut last = first;

        while let Some(record) = self.records.get(last).copied() {
            if record.range.begin >= interval.end {
                break;
            }
            assert!(
                record.range.begin <= covered,
                "Records of {:?} leave [{}, {}) uncovered",
                self.resource,
                covered,
                record.range.begin
            );

            let Some(overlap) = record.range.overlap(&interval) else {
                unreachable!("{:?} was selected without overlapping {:?}", record, interval)
            };
            let remainder = record.range.subtract(&overlap);

            replacement.extend(
                remainder
                    .iter()
                    .filter(|r| r.end <= overlap.begin)
                    .map(|&r| record.with_range(r)),
            );
            replacement.push(self.transition(&record, overlap, pending, barriers));
            replacement.extend(
                remainder
                    .iter()
                    .filter(|r| r.begin >= overlap.end)
                    .map(|&r| record.with_range(r)),
            );

            covered = overlap.end;
            last += 1;
        }

        assert!(
            covered == interval.end,
            "Records of {:?} don't cover {:?}",
            self.resource,
            interval
        );

        let inserted = replacement.len();
        self.records.splice(first..last, replacement);
        self.coalesce(first.saturating_sub(1), first + inserted + 1);
    }
    /// Computes the state that replaces `old` on `range` and emits the barrier between them.
    fn transition(
        &self,
        old: &StateRecord<M>,
        range: SubRange,
        pending: &PendingAccess<M>,
        barriers: &mut impl Extend<BarrierDescriptor>,
    ) -> StateRecord<M> {
        let usage = pending.usage;
        let new_layout = M::when_image(|| usage.layout);
        let writes = usage.is_write();

        // the same unit of work touching the resource again
        if old.index == pending.index && !pending.index.is_sentinel() {
            assert!(
                old.layout == new_layout,
                "{:?} is used with both {:?} and {:?} by a single task at {:?}",
                self.resource,
                old.layout,
                new_layout,
                pending.index
            );
            let mut merged = StateRecord {
                range,
                stages: old.stages | usage.stages,
                access: old.access | usage.access,
                ..*old
            };
            if writes {
                merged.write_stages |= usage.stages;
                merged.write_access |= usage.access;
                merged.visible_stages = vk::PipelineStageFlags2KHR::empty();
                merged.visible_access = vk::AccessFlags2KHR::empty();
            }
            return merged;
        }

        assert!(
            old.index.is_prior_to(pending.index),
            "{:?} accessed at {:?} was declared after an access at {:?}",
            self.resource,
            pending.index,
            old.index
        );

        let old_layout = old.layout_or_undefined();
        let old_touched = !old.stages.is_empty() || !old.access.is_empty();
        let modified = old.is_modified();
        // transitioning into UNDEFINED is not allowed, the contents are simply discarded
        let layout_change = M::IS_IMAGE
            && usage.layout != vk::ImageLayout::UNDEFINED
            && usage.layout != old_layout;

        let cross_queue = match (old.producer, pending.producer) {
            (Some(src), Some(dst)) if src.queue_family != dst.queue_family => Some((src, dst)),
            _ => None,
        };
        // ownership doesn't matter when the new access discards the contents
        let ownership_transfer = cross_queue.is_some()
            && !self.concurrent
            && (M::IS_BUFFER || usage.layout != vk::ImageLayout::UNDEFINED);

        // a write waits for every access since the last modification, a read only for the
        // modification itself and only until it was made visible to it
        let modifies = writes || layout_change;
        let hazard = if modifies {
            old_touched || modified || layout_change
        } else {
            modified && !old.is_visible_to(&usage)
        };

        if !(hazard || cross_queue.is_some()) {
            // readers accumulate so that a later write waits for all of them
            let record = StateRecord {
                range,
                stages: old.stages | usage.stages,
                access: old.access | usage.access,
                layout: new_layout,
                index: pending.index,
                producer: pending.producer.or(old.producer),
                ..*old
            };
            return if writes {
                StateRecord {
                    write_stages: usage.stages,
                    write_access: usage.access,
                    visible_stages: vk::PipelineStageFlags2KHR::empty(),
                    visible_access: vk::AccessFlags2KHR::empty(),
                    ..record
                }
            } else {
                record
            };
        }

        let kind = if modified || layout_change || ownership_transfer {
            BarrierKind::Memory
        } else {
            BarrierKind::Execution
        };
        let (src_queue_family, dst_queue_family) = match cross_queue {
            Some((src, dst)) if ownership_transfer => (src.queue_family, dst.queue_family),
            _ => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        };
        let src_stages = if modifies || !modified {
            old.stages | old.write_stages
        } else {
            old.write_stages
        };

        let descriptor = BarrierDescriptor {
            resource: self.resource,
            target: self.target,
            range,
            src_stages,
            src_access: old.write_access,
            dst_stages: usage.stages,
            dst_access: usage.access,
            old_layout,
            new_layout: if layout_change { usage.layout } else { old_layout },
            src_queue_family,
            dst_queue_family,
            wait: cross_queue.map(|(src, _)| src.task),
            kind,
        };
        trace!("{:?} needs {:?}", self.resource, descriptor);
        barriers.extend(std::iter::once(descriptor));

        let record = StateRecord {
            range,
            stages: usage.stages,
            access: usage.access,
            layout: new_layout,
            index: pending.index,
            producer: pending.producer,
            ..*old
        };
        if writes {
            StateRecord {
                write_stages: usage.stages,
                write_access: usage.access,
                visible_stages: vk::PipelineStageFlags2KHR::empty(),
                visible_access: vk::AccessFlags2KHR::empty(),
                ..record
            }
        } else if layout_change {
            // the transition is made available by the barrier, later readers chain
            // through its destination stages
            StateRecord {
                write_stages: usage.stages,
                write_access: vk::AccessFlags2KHR::empty(),
                visible_stages: usage.stages,
                visible_access: usage.access,
                ..record
            }
        } else {
            StateRecord {
                stages: old.stages | usage.stages,
                access: old.access | usage.access,
                visible_stages: old.visible_stages | usage.stages,
                visible_access: old.visible_access | usage.access,
                ..record
            }
        }
    }
    /// Merges neighbouring records with identical state within `start..end`.
    fn coalesce(&mut self, start: usize, end: usize) {
        let mut end = end.min(self.records.len());
        let mut i = start;
        while i + 1 < end {
            let (a, b) = (&self.records[i], &self.records[i + 1]);
            if a.range.end == b.range.begin && a.same_state(b) {
                self.records[i].range.end = self.records[i + 1].range.end;
                self.records.remove(i + 1);
                end -= 1;
            } else {
                i += 1;
            }
        }
    }
    /// The most recent producer among the records, sentinel records count as the oldest.
    fn last_producer(&self) -> Option<Producer> {
        self.records
            .iter()
            .filter_map(|r| r.producer.map(|p| (r.index, p)))
            .max_by_key(|(index, _)| if index.is_sentinel() { 0 } else { index.get() })
            .map(|(_, p)| p)
    }
    fn untouched_state(&self) -> PersistentState {
        debug_assert!(self.records.len() == 1);
        let record = &self.records[0];
        PersistentState {
            stages: record.stages,
            access: record.access,
            layout: record.layout_or_undefined(),
            last_producer: record.producer,
        }
    }
    /// Transitions the image back to its default layout at `final_index` and collapses the
    /// records, see [`LocalTracker::collapse`].
    ///
    /// Images without a default layout that ended in mixed layouts go to `GENERAL`.
    /// `final_index` may be [`ExeOrderIndex::FINAL`].
    pub fn reset_state(
        &mut self,
        final_index: ExeOrderIndex,
        barriers: &mut impl Extend<BarrierDescriptor>,
    ) -> PersistentState {
        assert!(
            final_index != ExeOrderIndex::INITIAL,
            "{:?} can't be reset into the Initial sentinel",
            self.resource
        );
        if !self.touched {
            return self.untouched_state();
        }

        if M::IS_IMAGE {
            let first_layout = self.records[0].layout;
            let uniform = self.records.iter().all(|r| r.layout == first_layout);
            let restore = if self.default_layout != vk::ImageLayout::UNDEFINED {
                Some(self.default_layout)
            } else if !uniform {
                Some(vk::ImageLayout::GENERAL)
            } else {
                None
            };

            if let Some(layout) = restore {
                let last_producer = self.last_producer();
                self.apply(
                    &PendingAccess {
                        range: M::whole_range(&self.extent),
                        usage: Usage::new(
                            vk::PipelineStageFlags2KHR::ALL_COMMANDS,
                            vk::AccessFlags2KHR::MEMORY_READ,
                            layout,
                        ),
                        index: final_index,
                        producer: None,
                    },
                    barriers,
                );
                // the restoring access has no producer of its own
                for record in &mut self.records {
                    record.producer = last_producer;
                }
            }
        }

        self.collapse()
    }
    /// Collapses the records into a single [`ExeOrderIndex::FINAL`] record without recording
    /// anything and returns the state to persist.
    ///
    /// The collapsed record keeps conservative `ALL_COMMANDS` and `MEMORY_WRITE` bits so that
    /// the next access always synchronizes against whatever happened in this session. Mixed
    /// layouts can't be described by a single record, the contents are then considered lost.
    pub fn collapse(&mut self) -> PersistentState {
        if !self.touched {
            return self.untouched_state();
        }

        let first_layout = self.records[0].layout;
        let layout = if self.records.iter().all(|r| r.layout == first_layout) {
            self.records[0].layout_or_undefined()
        } else {
            warn!(
                "{:?} collapsed with mixed layouts, its contents are discarded",
                self.resource
            );
            vk::ImageLayout::UNDEFINED
        };

        let state = PersistentState {
            stages: vk::PipelineStageFlags2KHR::ALL_COMMANDS,
            access: vk::AccessFlags2KHR::MEMORY_WRITE,
            layout,
            last_producer: self.last_producer(),
        };

        self.records.clear();
        self.records.push(StateRecord {
            range: SubRange::new(0, M::total(&self.extent)),
            stages: state.stages,
            access: state.access,
            write_stages: state.stages,
            write_access: state.access,
            visible_stages: vk::PipelineStageFlags2KHR::empty(),
            visible_access: vk::AccessFlags2KHR::empty(),
            layout: M::when_image(|| state.layout),
            index: ExeOrderIndex::FINAL,
            producer: state.last_producer,
        });
        self.touched = false;

        trace!("{:?} collapsed into {:?}", self.resource, state);
        state
    }
}
