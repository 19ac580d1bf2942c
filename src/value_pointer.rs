use crate::sync::{AtomicU64, Ordering};

/// The location of a node's value in the value arena, packed into a single
/// word so that both halves can be loaded and stored in one atomic
/// operation:
///
/// - value offset: u32 (bits 32-63)
/// - value size  : u32 (bits 0-31)
///
/// A reader that acquires the word sees the value bytes the matching writer
/// released before storing it, never a torn pair.
#[repr(C, align(8))]
pub(crate) struct ValuePointer(AtomicU64);

impl core::fmt::Debug for ValuePointer {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let (offset, size) = decode_value(self.0.load(Ordering::Relaxed));
    f.debug_struct("ValuePointer")
      .field("offset", &offset)
      .field("size", &size)
      .finish()
  }
}

impl ValuePointer {
  #[inline]
  pub(crate) fn new(offset: u32, size: u32) -> Self {
    Self(AtomicU64::new(encode_value(offset, size)))
  }

  #[inline]
  pub(crate) fn load(&self, ordering: Ordering) -> (u32, u32) {
    decode_value(self.0.load(ordering))
  }

  #[inline]
  pub(crate) fn store(&self, offset: u32, size: u32, ordering: Ordering) {
    self.0.store(encode_value(offset, size), ordering);
  }
}

#[inline]
const fn encode_value(offset: u32, size: u32) -> u64 {
  (offset as u64) << 32 | size as u64
}

#[inline]
const fn decode_value(value: u64) -> (u32, u32) {
  ((value >> 32) as u32, value as u32)
}

#[cfg(all(test, not(loom)))]
mod tests {
  use super::*;

  #[test]
  fn test_encode_decode() {
    assert_eq!(decode_value(encode_value(0, 0)), (0, 0));
    assert_eq!(decode_value(encode_value(1, u32::MAX)), (1, u32::MAX));
    assert_eq!(decode_value(encode_value(u32::MAX, 7)), (u32::MAX, 7));
  }

  #[test]
  fn test_store_load() {
    let vp = ValuePointer::new(42, 5);
    assert_eq!(vp.load(Ordering::Acquire), (42, 5));

    vp.store(1024, 0, Ordering::Release);
    assert_eq!(vp.load(Ordering::Acquire), (1024, 0));
    assert_eq!(
      std::format!("{:?}", vp),
      "ValuePointer { offset: 1024, size: 0 }"
    );
  }
}
