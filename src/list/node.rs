use core::{mem, ptr};

use crate::{
  arena::{Arena, ArenaError},
  sync::{AtomicU32, Ordering},
  value_pointer::ValuePointer,
  MAX_HEIGHT,
};

use super::Error;

/// Size of one tower slot: a 32-bit forward offset.
pub(super) const LINK_SIZE: usize = mem::size_of::<AtomicU32>();

#[derive(Debug)]
pub(super) struct NodePtr {
  pub(super) ptr: *const Node,
  pub(super) offset: u32,
}

impl Clone for NodePtr {
  fn clone(&self) -> Self {
    *self
  }
}

impl Copy for NodePtr {}

impl NodePtr {
  pub(super) const NULL: Self = Self {
    ptr: ptr::null(),
    offset: 0,
  };

  #[inline]
  pub(super) const fn new(ptr: *const u8, offset: u32) -> Self {
    Self {
      ptr: ptr.cast(),
      offset,
    }
  }

  #[inline]
  pub(super) fn is_null(&self) -> bool {
    self.ptr.is_null()
  }

  /// ## Safety
  /// - the pointer must be valid
  #[inline]
  pub(super) const unsafe fn as_ptr(&self) -> &Node {
    &*self.ptr.cast()
  }

  /// ## Safety
  /// - The caller must ensure that the node is allocated by the arena and
  ///   that `idx` is below the node's height.
  #[inline]
  pub(super) unsafe fn tower<'a>(&self, arena: &'a Arena, idx: usize) -> &'a AtomicU32 {
    let tower_ptr = arena.get_pointer(self.offset as usize + Node::SIZE + idx * LINK_SIZE);
    &*tower_ptr.cast()
  }

  /// ## Safety
  /// - The caller must ensure that the node is allocated by the arena and
  ///   that `idx` is below the node's height.
  pub(super) unsafe fn next_offset(&self, arena: &Arena, idx: usize) -> u32 {
    self.tower(arena, idx).load(Ordering::Acquire)
  }

  /// Plain-writes the forward offset on `idx`. Only valid while the node is
  /// not yet reachable on that level; publication happens through the CAS
  /// on the left neighbour.
  ///
  /// ## Safety
  /// - The caller must ensure that the node is allocated by the arena and
  ///   that `idx` is below the node's height.
  pub(super) unsafe fn init_next_offset(&self, arena: &Arena, idx: usize, next: u32) {
    self.tower(arena, idx).store(next, Ordering::Relaxed);
  }

  /// ## Safety
  /// - The caller must ensure that the node is allocated by the arena and
  ///   that `idx` is below the node's height.
  pub(super) unsafe fn cas_next_offset(
    &self,
    arena: &Arena,
    idx: usize,
    current: u32,
    new: u32,
  ) -> bool {
    self
      .tower(arena, idx)
      .compare_exchange(current, new, Ordering::SeqCst, Ordering::Acquire)
      .is_ok()
  }
}

#[derive(Debug)]
#[repr(C)]
pub(super) struct Node {
  /// Multiple parts of the value are encoded as a single u64 so that it
  /// can be atomically loaded and stored:
  ///   value offset: u32 (bits 32-63)
  ///   value size  : u32 (bits 0-31)
  /// Both halves refer to the value arena.
  pub(super) value: ValuePointer,
  // Immutable. No need to lock to access the key.
  pub(super) key_offset: u32,
  // Immutable. No need to lock to access the key.
  pub(super) key_size: u16,
  // Immutable. 1 <= height <= MAX_HEIGHT.
  pub(super) height: u8,
  // ** DO NOT REMOVE BELOW COMMENT**
  // The tower is attached after the node record; this field has to stay
  // commented out because the code will not allocate the full tower size.
  //
  // Most nodes do not need the full height of the tower, since the
  // probability of each successive level decreases exponentially. The
  // unused slots are never accessed, so when a node is allocated its
  // memory footprint is deliberately truncated to exclude them.
  //
  // All accesses to the slots go through atomic operations.
  // pub(super) tower: [AtomicU32; MAX_HEIGHT],
}

impl Node {
  pub(super) const SIZE: usize = mem::size_of::<Self>();
  pub(super) const ALIGN: u32 = mem::align_of::<Self>() as u32;

  pub(super) const MAX_NODE_SIZE: usize = Self::SIZE + MAX_HEIGHT * LINK_SIZE;

  /// The smallest main-arena capacity that still fits the head sentinel.
  #[inline]
  pub(super) const fn min_cap() -> usize {
    Self::MAX_NODE_SIZE + Self::ALIGN as usize
  }

  /// Allocates the sentinel: full height, empty key, no value.
  pub(super) fn new_empty_node_ptr(arena: &Arena) -> Result<NodePtr, ArenaError> {
    let node_offset = arena.alloc(Self::MAX_NODE_SIZE as u32, Self::ALIGN)?;

    // Safety: we just checked the offset is valid.
    unsafe {
      let ptr = arena.get_pointer_mut(node_offset as usize);
      // Safety: the node is well aligned.
      let node = &mut *(ptr as *mut Node);
      node.value = ValuePointer::new(0, 0);
      node.key_offset = 0;
      node.key_size = 0;
      node.height = MAX_HEIGHT as u8;
      ptr::write_bytes(ptr.add(Self::SIZE), 0, MAX_HEIGHT * LINK_SIZE);

      Ok(NodePtr::new(ptr, node_offset))
    }
  }

  /// Allocates a node with the given height, copying the key into the main
  /// arena and the value into the value arena. On failure anything already
  /// copied stays behind in the arenas; rollback is impossible without
  /// reclamation.
  pub(super) fn new_node_ptr(
    arena: &Arena,
    value_arena: &Arena,
    height: u8,
    key: &[u8],
    value: &[u8],
  ) -> Result<NodePtr, Error> {
    debug_assert!(
      height >= 1 && height as usize <= MAX_HEIGHT,
      "height cannot be less than one or greater than the max height"
    );

    if key.len() > u16::MAX as usize {
      return Err(Error::KeyTooLarge(key.len() as u64));
    }

    if value.len() > u32::MAX as usize {
      return Err(Error::ValueTooLarge(value.len() as u64));
    }

    // Compute the amount of the tower that will never be used, since the
    // height is less than MAX_HEIGHT.
    let unused_size = (MAX_HEIGHT - height as usize) * LINK_SIZE;
    let node_size = Self::MAX_NODE_SIZE - unused_size;

    let key_offset = arena.put_bytes(key)?;
    let node_offset = arena.alloc(node_size as u32, Self::ALIGN)?;
    let value_offset = value_arena.put_bytes(value)?;

    // Safety: we just checked the offset is valid.
    unsafe {
      let ptr = arena.get_pointer_mut(node_offset as usize);
      // Safety: the node is well aligned.
      let node = &mut *(ptr as *mut Node);
      node.key_offset = key_offset;
      node.key_size = key.len() as u16;
      node.height = height;
      ptr::write_bytes(ptr.add(Self::SIZE), 0, height as usize * LINK_SIZE);

      // The node is unreachable until it is spliced; the release store that
      // publishes it carries these writes with it.
      node.value = ValuePointer::new(value_offset, value.len() as u32);

      Ok(NodePtr::new(ptr, node_offset))
    }
  }

  /// ## Safety
  /// - The caller must ensure that the node is allocated by the arena.
  pub(super) unsafe fn get_key<'a, 'b: 'a>(&'a self, arena: &'b Arena) -> &'b [u8] {
    arena.get_bytes(self.key_offset as usize, self.key_size as usize)
  }

  /// ## Safety
  /// - The caller must ensure that the node's value was stored in the given
  ///   value arena.
  #[inline]
  pub(super) unsafe fn get_value<'a, 'b: 'a>(&'a self, value_arena: &'b Arena) -> &'b [u8] {
    let (offset, size) = self.value.load(Ordering::Acquire);
    value_arena.get_bytes(offset as usize, size as usize)
  }

  /// Rewrites the node's value. When the replacement fits in the current
  /// slot the slot is reused and its spare tail leaked; otherwise fresh
  /// space is taken from the value arena and the old region leaked. Either
  /// way the new location is published with a single release store.
  pub(super) fn set_value(&self, value_arena: &Arena, value: &[u8]) -> Result<(), Error> {
    if value.len() > u32::MAX as usize {
      return Err(Error::ValueTooLarge(value.len() as u64));
    }

    let new_size = value.len() as u32;
    let (offset, size) = self.value.load(Ordering::Acquire);
    if size >= new_size {
      // Safety: `[offset, offset + size)` was reserved when the current
      // value was stored, and the replacement is no larger.
      unsafe {
        value_arena.put_bytes_at(offset, value);
      }
      self.value.store(offset, new_size, Ordering::Release);
      return Ok(());
    }

    let new_offset = value_arena.put_bytes(value)?;
    self.value.store(new_offset, new_size, Ordering::Release);
    Ok(())
  }
}

#[cfg(all(test, not(loom)))]
mod tests {
  use super::*;

  #[test]
  fn test_node_layout() {
    // The tower must start right after the fixed fields, 4-byte aligned.
    assert_eq!(Node::SIZE % LINK_SIZE, 0);
    assert_eq!(Node::ALIGN, 8);
    assert_eq!(Node::MAX_NODE_SIZE, Node::SIZE + MAX_HEIGHT * LINK_SIZE);
  }

  #[test]
  fn test_clone() {
    let node_ptr = NodePtr::NULL;
    #[allow(clippy::clone_on_copy)]
    let _ = node_ptr.clone();
    assert!(node_ptr.is_null());
  }
}
