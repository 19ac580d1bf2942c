use core::{
  ptr::{self, NonNull},
  slice,
};

use std::{alloc, boxed::Box};

use crossbeam_utils::CachePadded;

use crate::sync::{AtomicMut, AtomicPtr, AtomicU32, Ordering};

/// An error indicating that the arena is full
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct ArenaError;

impl core::fmt::Display for ArenaError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "allocation failed because arena is full")
  }
}

#[cfg(feature = "std")]
impl std::error::Error for ArenaError {}

#[derive(Debug)]
struct AlignedVec {
  ptr: NonNull<u8>,
  cap: usize,
}

impl AlignedVec {
  /// Node records embed 64-bit atomics, and every node offset handed out by
  /// the allocator is a multiple of 8 relative to the buffer start.
  const ALIGNMENT: usize = 8;

  const MAX_CAPACITY: usize = isize::MAX as usize - (Self::ALIGNMENT - 1);

  #[inline]
  fn new(capacity: usize) -> Self {
    assert!(
      capacity <= Self::MAX_CAPACITY,
      "`capacity` cannot exceed isize::MAX - {}",
      Self::ALIGNMENT - 1
    );

    if capacity == 0 {
      return Self {
        ptr: NonNull::dangling(),
        cap: 0,
      };
    }

    let ptr = unsafe {
      let layout = alloc::Layout::from_size_align_unchecked(capacity, Self::ALIGNMENT);
      let ptr = alloc::alloc(layout);
      if ptr.is_null() {
        alloc::handle_alloc_error(layout);
      }
      NonNull::new_unchecked(ptr)
    };

    unsafe {
      ptr::write_bytes(ptr.as_ptr(), 0, capacity);
    }
    Self { ptr, cap: capacity }
  }

  #[inline]
  fn layout(&self) -> alloc::Layout {
    unsafe { alloc::Layout::from_size_align_unchecked(self.cap, Self::ALIGNMENT) }
  }
}

impl Drop for AlignedVec {
  #[inline]
  fn drop(&mut self) {
    if self.cap != 0 {
      unsafe {
        alloc::dealloc(self.ptr.as_ptr(), self.layout());
      }
    }
  }
}

/// An append-only allocation cursor over a fixed byte buffer.
///
/// Offsets are the only kind of pointer the arena hands out, and they stay
/// valid for the arena's whole lifetime because nothing is ever freed or
/// moved. Offset `0` is reserved as the null link sentinel, so the cursor
/// starts at `1`.
pub(crate) struct Arena {
  data_ptr: NonNull<u8>,
  n: CachePadded<AtomicU32>,
  inner: AtomicPtr<()>,
  cap: u32,
}

impl core::fmt::Debug for Arena {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Arena")
      .field("cap", &self.cap)
      .field("allocated", &self.size())
      .finish()
  }
}

impl Arena {
  #[inline]
  pub(crate) fn new(capacity: u32) -> Self {
    let vec = AlignedVec::new(capacity as usize);
    let data_ptr = vec.ptr;
    Self {
      cap: vec.cap as u32,
      inner: AtomicPtr::new(Box::into_raw(Box::new(vec)) as _),
      data_ptr,
      n: CachePadded::new(AtomicU32::new(1)),
    }
  }

  /// Returns the number of bytes allocated by the arena, including the
  /// reserved null byte.
  #[inline]
  pub(crate) fn size(&self) -> usize {
    self.n.load(Ordering::Acquire) as usize
  }

  /// Returns the capacity of the arena.
  #[inline]
  pub(crate) const fn capacity(&self) -> usize {
    self.cap as usize
  }

  /// Returns the number of bytes that can still be allocated by the arena.
  #[inline]
  pub(crate) fn remaining(&self) -> usize {
    self.capacity().saturating_sub(self.size())
  }

  /// Reserves `size` bytes and returns their offset, aligned to `align`
  /// (which must be a power of two). The cursor only moves when the
  /// reservation fits, so it never passes the capacity.
  pub(crate) fn alloc(&self, size: u32, align: u32) -> Result<u32, ArenaError> {
    let padded = size as u64 + align as u64 - 1;

    let mut current = self.n.load(Ordering::Acquire);
    loop {
      let want = current as u64 + padded;
      if want > self.cap as u64 {
        return Err(ArenaError);
      }

      match self.n.compare_exchange_weak(
        current,
        want as u32,
        Ordering::SeqCst,
        Ordering::Acquire,
      ) {
        Ok(allocated) => {
          // Return the aligned offset.
          let new_size = allocated + padded as u32;
          return Ok((new_size - size) & !(align - 1));
        }
        Err(x) => current = x,
      }
    }
  }

  /// Copies `data` into freshly reserved space and returns its offset.
  pub(crate) fn put_bytes(&self, data: &[u8]) -> Result<u32, ArenaError> {
    let offset = self.alloc(data.len() as u32, 1)?;

    // Safety: the range was just reserved for us and nobody else will ever
    // receive it.
    unsafe {
      let ptr = self.get_pointer_mut(offset as usize);
      ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
    }
    Ok(offset)
  }

  /// Overwrites bytes in place at a previously returned offset.
  ///
  /// ## Safety
  /// - `offset` must have been returned by this arena.
  /// - `offset + data.len()` must lie inside the region the caller
  ///   originally reserved at `offset`.
  pub(crate) unsafe fn put_bytes_at(&self, offset: u32, data: &[u8]) {
    let ptr = self.get_pointer_mut(offset as usize);
    ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
  }

  /// ## Safety
  /// - The caller must make sure that `offset + size` must be less than the
  ///   capacity of the arena.
  #[inline]
  pub(crate) unsafe fn get_bytes(&self, offset: usize, size: usize) -> &[u8] {
    if offset == 0 {
      return &[];
    }

    let ptr = self.get_pointer(offset);
    slice::from_raw_parts(ptr, size)
  }

  /// ## Safety
  /// - The caller must make sure that `offset` must be less than the
  ///   capacity of the arena.
  #[inline]
  pub(crate) unsafe fn get_pointer(&self, offset: usize) -> *const u8 {
    if offset == 0 {
      return ptr::null();
    }
    self.data_ptr.as_ptr().add(offset)
  }

  /// ## Safety
  /// - The caller must make sure that `offset` must be less than the
  ///   capacity of the arena.
  #[inline]
  pub(crate) unsafe fn get_pointer_mut(&self, offset: usize) -> *mut u8 {
    if offset == 0 {
      return ptr::null_mut();
    }
    self.data_ptr.as_ptr().add(offset)
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    // Safety: `inner` was created by `Box::into_raw` in `new` and is only
    // reclaimed here.
    unsafe {
      self.inner.with_mut(|vec| {
        let vec: *mut AlignedVec = vec.cast();
        drop(Box::from_raw(vec));
      });
    }
  }
}

#[cfg(all(test, not(loom)))]
mod tests {
  use super::*;

  #[test]
  fn test_alloc_reserves_null_offset() {
    let arena = Arena::new(1024);
    assert_eq!(arena.size(), 1);

    let offset = arena.alloc(16, 1).unwrap();
    assert_eq!(offset, 1);
    assert_eq!(arena.size(), 17);
  }

  #[test]
  fn test_alloc_alignment() {
    let arena = Arena::new(1024);
    arena.alloc(3, 1).unwrap();

    let offset = arena.alloc(16, 8).unwrap();
    assert_eq!(offset % 8, 0);
    assert!(offset >= 4);
  }

  #[test]
  fn test_alloc_full() {
    let arena = Arena::new(64);
    assert!(arena.alloc(32, 1).is_ok());
    assert_eq!(arena.alloc(64, 1), Err(ArenaError));
    // The failed reservation did not move the cursor.
    assert!(arena.alloc(31, 1).is_ok());
    assert!(arena.size() <= arena.capacity());
  }

  #[test]
  fn test_put_get_bytes() {
    let arena = Arena::new(1024);
    let offset = arena.put_bytes(b"remember").unwrap();

    unsafe {
      assert_eq!(arena.get_bytes(offset as usize, 8), b"remember");
      arena.put_bytes_at(offset, b"for");
      assert_eq!(arena.get_bytes(offset as usize, 3), b"for");
    }
  }

  #[test]
  fn test_get_bytes_null_offset() {
    let arena = Arena::new(64);
    unsafe {
      assert_eq!(arena.get_bytes(0, 0), &[] as &[u8]);
      assert!(arena.get_pointer(0).is_null());
    }
  }

  #[test]
  fn test_debug() {
    let arena = Arena::new(64);
    assert_eq!(
      std::format!("{:?}", arena),
      "Arena { cap: 64, allocated: 1 }"
    );
    assert_eq!(
      std::format!("{}", ArenaError),
      "allocation failed because arena is full"
    );
  }
}
