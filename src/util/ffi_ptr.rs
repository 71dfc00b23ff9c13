/// Turns a possibly empty slice into a pointer for a `*_count` + `p_*` pair of a Vulkan struct.
///
/// An empty slice would hand out a dangling pointer, which is technically fine since the
/// count is zero, but validation layers and some drivers are happier with null.
pub trait AsFFiPtr {
    type Pointee;
    fn as_ffi_ptr(&self) -> *const Self::Pointee;
    fn ffi_len(&self) -> u32;
}

impl<T> AsFFiPtr for [T] {
    type Pointee = T;
    #[inline(always)]
    fn as_ffi_ptr(&self) -> *const Self::Pointee {
        if self.is_empty() {
            std::ptr::null()
        } else {
            self.as_ptr()
        }
    }
    #[inline(always)]
    fn ffi_len(&self) -> u32 {
        self.len().try_into().unwrap()
    }
}

#[test]
fn test_empty_slice_is_null() {
    let empty: &[u32] = &[];
    assert!(empty.as_ffi_ptr().is_null());
    assert_eq!(empty.ffi_len(), 0);

    let full = [1u32, 2];
    assert_eq!(full.as_ffi_ptr(), full.as_ptr());
    assert_eq!(full[..].ffi_len(), 2);
}
