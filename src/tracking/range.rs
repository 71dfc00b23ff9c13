use std::fmt::Debug;

use pumice::vk;
use smallvec::{smallvec, SmallVec};

/// Index of a subresource when the `(level, layer)` grid of an image is laid out
/// layer-major within each level.
#[inline]
pub fn linear_index(level: u32, layer: u32, layers: u32) -> u64 {
    debug_assert!(layer < layers || (layer == 0 && layers == 0));
    level as u64 * layers as u64 + layer as u64
}

/// Inverse of [`linear_index`].
#[inline]
pub fn level_layer(index: u64, layers: u32) -> (u32, u32) {
    let layers = layers as u64;
    ((index / layers) as u32, (index % layers) as u32)
}

/// Half-open interval `[begin, end)` over the linearized subresources of a resource.
///
/// For buffers the unit is a byte, for images a single `(level, layer)` subresource.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubRange {
    pub begin: u64,
    pub end: u64,
}

impl SubRange {
    #[inline]
    pub fn new(begin: u64, end: u64) -> Self {
        debug_assert!(begin <= end, "Inverted range [{begin}, {end})");
        Self { begin, end }
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }
    #[inline]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }
    #[inline]
    pub fn intersects(&self, other: &SubRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }
    #[inline]
    pub fn contains(&self, other: &SubRange) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }
    pub fn overlap(&self, other: &SubRange) -> Option<SubRange> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        (begin < end).then(|| SubRange { begin, end })
    }
    /// The parts of `self` not covered by `other`, in ascending order.
    pub fn subtract(&self, other: &SubRange) -> SmallVec<[SubRange; 2]> {
        let Some(overlap) = self.overlap(other) else {
            return smallvec![*self];
        };

        let mut out = SmallVec::new();
        if self.begin < overlap.begin {
            out.push(SubRange::new(self.begin, overlap.begin));
        }
        if overlap.end < self.end {
            out.push(SubRange::new(overlap.end, self.end));
        }
        out
    }
    /// Converts an interval of an image with `layers` array layers back into rectangles:
    /// the partial head level, the whole levels in between and the partial tail level.
    pub fn to_image_ranges(&self, layers: u32) -> SmallVec<[ImageRange; 3]> {
        let mut out = SmallVec::new();
        if self.is_empty() {
            return out;
        }

        let (first_level, first_layer) = level_layer(self.begin, layers);
        let (last_level, last_layer) = level_layer(self.end, layers);

        if first_level == last_level {
            out.push(ImageRange::new(
                first_level,
                1,
                first_layer,
                last_layer - first_layer,
            ));
            return out;
        }

        let mut whole_begin = first_level;
        if first_layer != 0 {
            out.push(ImageRange::new(
                first_level,
                1,
                first_layer,
                layers - first_layer,
            ));
            whole_begin += 1;
        }
        if whole_begin < last_level {
            out.push(ImageRange::new(
                whole_begin,
                last_level - whole_begin,
                0,
                layers,
            ));
        }
        if last_layer != 0 {
            out.push(ImageRange::new(last_level, 1, 0, last_layer));
        }
        out
    }
}

impl Debug for SubRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// A rectangle in `(mip level, array layer)` space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ImageRange {
    pub base_level: u32,
    pub level_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl ImageRange {
    pub fn new(base_level: u32, level_count: u32, base_layer: u32, layer_count: u32) -> Self {
        Self {
            base_level,
            level_count,
            base_layer,
            layer_count,
        }
    }
    pub fn whole(levels: u32, layers: u32) -> Self {
        Self::new(0, levels, 0, layers)
    }
    #[inline]
    pub fn end_level(&self) -> u32 {
        self.base_level + self.level_count
    }
    #[inline]
    pub fn end_layer(&self) -> u32 {
        self.base_layer + self.layer_count
    }
    pub fn is_empty(&self) -> bool {
        self.level_count == 0 || self.layer_count == 0
    }
    pub fn subresource_count(&self) -> u64 {
        self.level_count as u64 * self.layer_count as u64
    }
    pub fn overlap(&self, other: &ImageRange) -> Option<ImageRange> {
        let base_level = self.base_level.max(other.base_level);
        let end_level = self.end_level().min(other.end_level());
        let base_layer = self.base_layer.max(other.base_layer);
        let end_layer = self.end_layer().min(other.end_layer());

        (base_level < end_level && base_layer < end_layer).then(|| {
            ImageRange::new(
                base_level,
                end_level - base_level,
                base_layer,
                end_layer - base_layer,
            )
        })
    }
    /// The part of `self` not covered by `other`.
    ///
    /// Levels outside of the overlap stay whole, the overlapped levels keep only the layers
    /// to the left and right of it so that a write into a few layers of one level doesn't
    /// spill into its neighbours.
    pub fn subtract(&self, other: &ImageRange) -> SmallVec<[ImageRange; 4]> {
        let Some(overlap) = self.overlap(other) else {
            return smallvec![*self];
        };

        let mut out = SmallVec::new();
        if self.base_level < overlap.base_level {
            out.push(ImageRange::new(
                self.base_level,
                overlap.base_level - self.base_level,
                self.base_layer,
                self.layer_count,
            ));
        }
        if self.base_layer < overlap.base_layer {
            out.push(ImageRange::new(
                overlap.base_level,
                overlap.level_count,
                self.base_layer,
                overlap.base_layer - self.base_layer,
            ));
        }
        if overlap.end_layer() < self.end_layer() {
            out.push(ImageRange::new(
                overlap.base_level,
                overlap.level_count,
                overlap.end_layer(),
                self.end_layer() - overlap.end_layer(),
            ));
        }
        if overlap.end_level() < self.end_level() {
            out.push(ImageRange::new(
                overlap.end_level(),
                self.end_level() - overlap.end_level(),
                self.base_layer,
                self.layer_count,
            ));
        }
        out
    }
    /// Linearizes the rectangle for an image with `layers` array layers, one interval when
    /// it spans whole levels, otherwise one interval per level.
    pub fn intervals(&self, layers: u32) -> SmallVec<[SubRange; 4]> {
        if self.is_empty() {
            return SmallVec::new();
        }

        if self.base_layer == 0 && self.layer_count == layers {
            smallvec![SubRange::new(
                linear_index(self.base_level, 0, layers),
                linear_index(self.end_level(), 0, layers),
            )]
        } else {
            (self.base_level..self.end_level())
                .map(|level| {
                    let begin = linear_index(level, self.base_layer, layers);
                    SubRange::new(begin, begin + self.layer_count as u64)
                })
                .collect()
        }
    }
    pub fn to_vk(&self, aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: self.base_level,
            level_count: self.level_count,
            base_array_layer: self.base_layer,
            layer_count: self.layer_count,
        }
    }
}

/// A byte range of a buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }
    pub fn whole(size: u64) -> Self {
        Self::new(0, size)
    }
    pub fn to_sub_range(&self) -> SubRange {
        SubRange::new(self.offset, self.offset + self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered_area(pieces: &[ImageRange]) -> u64 {
        pieces.iter().map(ImageRange::subresource_count).sum()
    }

    fn assert_disjoint(pieces: &[ImageRange]) {
        for (i, a) in pieces.iter().enumerate() {
            for b in &pieces[i + 1..] {
                assert!(a.overlap(b).is_none(), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn test_sub_range_overlap() {
        let a = SubRange::new(0, 10);
        assert_eq!(a.overlap(&SubRange::new(5, 20)), Some(SubRange::new(5, 10)));
        assert_eq!(a.overlap(&SubRange::new(10, 20)), None);
        assert!(!a.intersects(&SubRange::new(10, 11)));
        assert!(a.contains(&SubRange::new(2, 3)));
    }

    #[test]
    fn test_sub_range_subtract() {
        let a = SubRange::new(0, 10);
        assert_eq!(
            a.subtract(&SubRange::new(3, 5)).as_slice(),
            &[SubRange::new(0, 3), SubRange::new(5, 10)]
        );
        assert_eq!(
            a.subtract(&SubRange::new(0, 5)).as_slice(),
            &[SubRange::new(5, 10)]
        );
        assert!(a.subtract(&SubRange::new(0, 10)).is_empty());
        assert_eq!(a.subtract(&SubRange::new(20, 30)).as_slice(), &[a]);
    }

    #[test]
    fn test_linear_index_inverse() {
        let layers = 8;
        let index = linear_index(3, 5, layers);
        assert_eq!(index, 29);
        assert_eq!(level_layer(index, layers), (3, 5));
    }

    #[test]
    fn test_image_subtract_single_level_write() {
        let image = ImageRange::whole(11, 8);
        let write = ImageRange::new(0, 1, 0, 2);

        let rest = image.subtract(&write);
        assert_eq!(
            rest.as_slice(),
            &[ImageRange::new(0, 1, 2, 6), ImageRange::new(1, 10, 0, 8)]
        );
        assert_disjoint(&rest);
        assert!(rest.iter().all(|r| r.overlap(&write).is_none()));
        assert_eq!(
            covered_area(&rest) + write.subresource_count(),
            image.subresource_count()
        );
    }

    #[test]
    fn test_image_subtract_inner_rectangle() {
        let image = ImageRange::new(0, 4, 0, 8);
        let hole = ImageRange::new(1, 2, 2, 3);

        let rest = image.subtract(&hole);
        assert_eq!(rest.len(), 4);
        assert_disjoint(&rest);
        assert!(rest.iter().all(|r| r.overlap(&hole).is_none()));
        assert_eq!(
            covered_area(&rest) + hole.subresource_count(),
            image.subresource_count()
        );
        // the strips next to the hole only span the overlapped levels
        assert_eq!(rest[1], ImageRange::new(1, 2, 0, 2));
        assert_eq!(rest[2], ImageRange::new(1, 2, 5, 3));
    }

    #[test]
    fn test_image_subtract_disjoint() {
        let a = ImageRange::new(0, 2, 0, 4);
        let b = ImageRange::new(2, 2, 0, 4);
        assert_eq!(a.subtract(&b).as_slice(), &[a]);
    }

    #[test]
    fn test_intervals_row_splitting() {
        let whole_levels = ImageRange::new(2, 3, 0, 8);
        assert_eq!(
            whole_levels.intervals(8).as_slice(),
            &[SubRange::new(16, 40)]
        );

        let partial = ImageRange::new(1, 3, 2, 3);
        assert_eq!(
            partial.intervals(8).as_slice(),
            &[
                SubRange::new(10, 13),
                SubRange::new(18, 21),
                SubRange::new(26, 29)
            ]
        );
    }

    #[test]
    fn test_to_image_ranges() {
        assert_eq!(
            SubRange::new(2, 88).to_image_ranges(8).as_slice(),
            &[ImageRange::new(0, 1, 2, 6), ImageRange::new(1, 10, 0, 8)]
        );
        assert_eq!(
            SubRange::new(3, 21).to_image_ranges(8).as_slice(),
            &[
                ImageRange::new(0, 1, 3, 5),
                ImageRange::new(1, 1, 0, 8),
                ImageRange::new(2, 1, 0, 5)
            ]
        );
        assert_eq!(
            SubRange::new(9, 12).to_image_ranges(8).as_slice(),
            &[ImageRange::new(1, 1, 1, 3)]
        );
        assert_eq!(
            SubRange::new(1, 7).to_image_ranges(1).as_slice(),
            &[ImageRange::new(1, 6, 0, 1)]
        );
    }

    #[test]
    fn test_image_range_to_vk() {
        let range = ImageRange::new(1, 2, 3, 4).to_vk(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.base_mip_level, 1);
        assert_eq!(range.level_count, 2);
        assert_eq!(range.base_array_layer, 3);
        assert_eq!(range.layer_count, 4);
    }

    #[test]
    fn test_buffer_range() {
        assert_eq!(
            BufferRange::new(16, 32).to_sub_range(),
            SubRange::new(16, 48)
        );
    }
}
