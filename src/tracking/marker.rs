use std::fmt::Debug;

use smallvec::{smallvec, SmallVec};

use super::range::{BufferRange, ImageRange, SubRange};

/// An `Option` whose variant is decided by the type, used for state that only images carry.
pub trait TypeOption<T>: Copy + PartialEq + Debug {
    fn new_some(val: T) -> Self;
    fn get(&self) -> &T;
    fn to_option(self) -> Option<T>;
    #[inline(always)]
    fn unwrap_or(self, default: T) -> T {
        self.to_option().unwrap_or(default)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeSome<T>(T);

impl<T: Copy + PartialEq + Debug> TypeOption<T> for TypeSome<T> {
    #[inline(always)]
    fn new_some(val: T) -> Self {
        TypeSome(val)
    }
    #[inline(always)]
    fn get(&self) -> &T {
        &self.0
    }
    #[inline(always)]
    fn to_option(self) -> Option<T> {
        Some(self.0)
    }
}

impl<T: Debug> Debug for TypeSome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

pub struct TypeNone<T>(std::marker::PhantomData<fn() -> T>);

impl<T: Copy + PartialEq + Debug> TypeOption<T> for TypeNone<T> {
    #[inline(always)]
    fn new_some(_val: T) -> Self {
        TypeNone(std::marker::PhantomData)
    }
    #[inline(always)]
    fn get(&self) -> &T {
        unreachable!("Buffers carry no image state")
    }
    #[inline(always)]
    fn to_option(self) -> Option<T> {
        None
    }
}

impl<T> Clone for TypeNone<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        Self(std::marker::PhantomData)
    }
}
impl<T> Copy for TypeNone<T> {}
impl<T> PartialEq for TypeNone<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}
impl<T> Eq for TypeNone<T> {}
impl<T> Debug for TypeNone<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("-")
    }
}

/// Size of an image in the dimensions the tracker cares about.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ImageExtent {
    pub levels: u32,
    pub layers: u32,
}

/// Selects between image and buffer behaviour of the tracking code at compile time.
pub trait ResourceMarker: 'static {
    const IS_IMAGE: bool;
    const IS_BUFFER: bool = !Self::IS_IMAGE;

    type IfImage<T: Copy + PartialEq + Debug>: TypeOption<T>;
    fn when_image<T: Copy + PartialEq + Debug, F: FnOnce() -> T>(fun: F) -> Self::IfImage<T>;

    /// What a declared access addresses.
    type Range: Copy + PartialEq + Debug;
    /// How large the tracked subresource space is.
    type Extent: Copy + PartialEq + Debug;

    fn whole_range(extent: &Self::Extent) -> Self::Range;
    /// Number of linear units covering the whole resource.
    fn total(extent: &Self::Extent) -> u64;
    /// Linear intervals covered by `range`, panics when it leaves the resource.
    fn intervals(range: &Self::Range, extent: &Self::Extent) -> SmallVec<[SubRange; 4]>;
}

#[derive(Clone, Copy, Default, Debug)]
pub struct ImageMarker;
impl ResourceMarker for ImageMarker {
    const IS_IMAGE: bool = true;

    type IfImage<T: Copy + PartialEq + Debug> = TypeSome<T>;

    #[inline(always)]
    fn when_image<T: Copy + PartialEq + Debug, F: FnOnce() -> T>(fun: F) -> Self::IfImage<T> {
        TypeSome(fun())
    }

    type Range = ImageRange;
    type Extent = ImageExtent;

    fn whole_range(extent: &ImageExtent) -> ImageRange {
        ImageRange::whole(extent.levels, extent.layers)
    }
    fn total(extent: &ImageExtent) -> u64 {
        extent.levels as u64 * extent.layers as u64
    }
    fn intervals(range: &ImageRange, extent: &ImageExtent) -> SmallVec<[SubRange; 4]> {
        assert!(
            range.end_level() <= extent.levels && range.end_layer() <= extent.layers,
            "{range:?} is out of bounds of an image with {} levels and {} layers",
            extent.levels,
            extent.layers
        );
        range.intervals(extent.layers)
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct BufferMarker;
impl ResourceMarker for BufferMarker {
    const IS_IMAGE: bool = false;

    type IfImage<T: Copy + PartialEq + Debug> = TypeNone<T>;

    #[inline(always)]
    fn when_image<T: Copy + PartialEq + Debug, F: FnOnce() -> T>(_fun: F) -> Self::IfImage<T> {
        TypeNone(std::marker::PhantomData)
    }

    type Range = BufferRange;
    /// Size in bytes.
    type Extent = u64;

    fn whole_range(extent: &u64) -> BufferRange {
        BufferRange::whole(*extent)
    }
    fn total(extent: &u64) -> u64 {
        *extent
    }
    fn intervals(range: &BufferRange, extent: &u64) -> SmallVec<[SubRange; 4]> {
        let sub = range.to_sub_range();
        assert!(
            sub.end <= *extent,
            "{range:?} is out of bounds of a buffer of {extent} bytes"
        );
        if sub.is_empty() {
            SmallVec::new()
        } else {
            smallvec![sub]
        }
    }
}

#[cfg(test)]
mod tests {
    use pumice::vk;

    use super::*;

    #[test]
    fn test_type_option() {
        let some = ImageMarker::when_image(|| vk::ImageLayout::GENERAL);
        assert_eq!(some.to_option(), Some(vk::ImageLayout::GENERAL));

        let none = BufferMarker::when_image(|| vk::ImageLayout::GENERAL);
        assert_eq!(none.to_option(), None);
        assert_eq!(
            none.unwrap_or(vk::ImageLayout::UNDEFINED),
            vk::ImageLayout::UNDEFINED
        );
        assert_eq!(none, BufferMarker::when_image(|| vk::ImageLayout::PREINITIALIZED));
    }

    #[test]
    fn test_marker_intervals() {
        let extent = ImageExtent {
            levels: 11,
            layers: 8,
        };
        assert_eq!(ImageMarker::total(&extent), 88);
        assert_eq!(
            ImageMarker::intervals(&ImageMarker::whole_range(&extent), &extent).as_slice(),
            &[SubRange::new(0, 88)]
        );
        assert_eq!(
            BufferMarker::intervals(&BufferRange::new(8, 8), &64).as_slice(),
            &[SubRange::new(8, 16)]
        );
        assert!(BufferMarker::intervals(&BufferRange::new(8, 0), &64).is_empty());
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_image_range() {
        let extent = ImageExtent {
            levels: 2,
            layers: 1,
        };
        ImageMarker::intervals(&ImageRange::new(1, 2, 0, 1), &extent);
    }
}
