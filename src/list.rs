use core::cmp;

use crossbeam_utils::CachePadded;

use rand::Rng;

use crate::{
  arena::Arena,
  sync::{AtomicU32, Ordering},
  Ascend, Comparator, HEIGHT_INCREASE, MAX_HEIGHT,
};

mod node;
use node::{Node, NodePtr};
mod error;
pub use error::Error;
mod entry;
pub use entry::EntryRef;
mod iterator;
pub use iterator::Iter;


/// A fast, concurrent, ordered map implementation based on a skiplist whose
/// nodes, keys and values all live inside two append-only arenas. Keys are
/// opaque byte sequences ordered by the list's [`Comparator`]; inserting an
/// existing key rewrites its value in place. Deletion is not supported:
/// higher-level code is expected to seal the whole list and rebuild, or to
/// shadow entries with tombstone values it interprets itself.
#[derive(Debug)]
pub struct SkipList<C = Ascend> {
  /// Holds the node records and key bytes.
  arena: Arena,
  /// Holds only value bytes, so rewriting a value never touches a node and
  /// values can be sealed or rotated independently.
  value_arena: Arena,
  head: NodePtr,

  /// Current height. 1 <= height <= MAX_HEIGHT. CAS.
  height: CachePadded<AtomicU32>,
  len: CachePadded<AtomicU32>,

  cmp: C,
}

// Safety: the raw head pointer always refers into `arena`, which lives and
// dies with the list; all shared mutation goes through atomics.
unsafe impl<C: Send> Send for SkipList<C> {}
unsafe impl<C: Sync> Sync for SkipList<C> {}

// --------------------------------Public Methods--------------------------------
impl<C> SkipList<C> {
  /// Returns the height of the highest tower within any of the nodes that
  /// have ever been allocated as part of this skiplist.
  #[inline]
  pub fn height(&self) -> u32 {
    self.height.load(Ordering::Acquire)
  }

  /// Returns the number of entries in the skiplist.
  #[inline]
  pub fn len(&self) -> usize {
    self.len.load(Ordering::Acquire) as usize
  }

  /// Returns true if the skiplist is empty.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Returns the number of bytes allocated from the main arena, which holds
  /// the node records and key bytes.
  #[inline]
  pub fn size(&self) -> usize {
    self.arena.size()
  }

  /// Returns the number of bytes allocated from the value arena.
  #[inline]
  pub fn value_size(&self) -> usize {
    self.value_arena.size()
  }

  /// Returns the capacity of each arena.
  #[inline]
  pub const fn capacity(&self) -> usize {
    self.arena.capacity()
  }

  /// Returns the number of bytes the main arena can still hand out.
  #[inline]
  pub fn remaining(&self) -> usize {
    self.arena.remaining()
  }
}

impl SkipList {
  /// Create a new skiplist backed by two arenas of the given capacity, one
  /// for nodes and keys and one for value bytes.
  ///
  /// **Note:** The capacity stands for how much memory is allocated up
  /// front, it does not mean the skiplist can store `cap` entries.
  pub fn new(capacity: u32) -> Result<Self, Error> {
    Self::with_comparator(capacity, Ascend)
  }
}

impl<C> SkipList<C> {
  /// Like [`SkipList::new`], but with a custom comparator.
  pub fn with_comparator(capacity: u32, cmp: C) -> Result<Self, Error> {
    let arena = Arena::new(capacity.max(Node::min_cap() as u32));
    let value_arena = Arena::new(capacity);
    let head = Node::new_empty_node_ptr(&arena)?;

    Ok(Self {
      arena,
      value_arena,
      head,
      height: CachePadded::new(AtomicU32::new(1)),
      len: CachePadded::new(AtomicU32::new(0)),
      cmp,
    })
  }
}

impl<C: Comparator> SkipList<C> {
  /// Returns true if the key exists in the list.
  #[inline]
  pub fn contains_key(&self, key: &[u8]) -> bool {
    self.get(key).is_some()
  }

  /// Returns the value associated with the given key, if it exists. An
  /// empty value comes back as a zero-length view, distinguishable from
  /// `None`.
  pub fn get(&self, key: &[u8]) -> Option<EntryRef<'_>> {
    unsafe {
      let (nd, found) = self.find_closest(key);
      if !found {
        return None;
      }

      Some(EntryRef::from_node(nd, &self.arena, &self.value_arena))
    }
  }

  /// Returns the first entry in the list.
  pub fn first(&self) -> Option<EntryRef<'_>> {
    // Safety: the head node was definitely allocated by self.arena.
    unsafe {
      let nd = self.get_next(self.head, 0);
      if nd.is_null() {
        return None;
      }

      Some(EntryRef::from_node(nd, &self.arena, &self.value_arena))
    }
  }

  /// Returns an iterator over the whole list in key order.
  #[inline]
  pub const fn iter(&self) -> Iter<'_, C> {
    Iter::new(self)
  }

  /// Inserts the key, or rewrites its value in place if it already exists.
  ///
  /// # Errors
  ///
  /// - [`Error::Full`], if there isn't enough room in one of the arenas.
  /// - [`Error::KeyTooLarge`] / [`Error::ValueTooLarge`], if a length field
  ///   would overflow. Nothing is written in that case.
  #[cfg(feature = "std")]
  pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
    self.insert_with(&mut rand::thread_rng(), key, value)
  }

  /// Inserts the key, or rewrites its value in place if it already exists.
  ///
  /// # Errors
  ///
  /// - [`Error::Full`], if there isn't enough room in one of the arenas.
  /// - [`Error::KeyTooLarge`] / [`Error::ValueTooLarge`], if a length field
  ///   would overflow. Nothing is written in that case.
  #[cfg(not(feature = "std"))]
  pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
    self.insert_with(&mut rand::rngs::OsRng, key, value)
  }

  /// Like [`SkipList::insert`], but flips the height coins with the given
  /// generator. Useful when the embedding wants a seeded or otherwise
  /// controlled source.
  pub fn insert_with<R: Rng>(&self, rng: &mut R, key: &[u8], value: &[u8]) -> Result<(), Error> {
    self.insert_in(key, value, random_height(rng))
  }
}

// --------------------------------Private Methods--------------------------------
impl<C> SkipList<C> {
  /// ## Safety
  ///
  /// - The caller must ensure that the node is allocated by the arena.
  #[inline]
  pub(super) unsafe fn get_next(&self, nptr: NodePtr, level: usize) -> NodePtr {
    let offset = nptr.next_offset(&self.arena, level);
    let ptr = self.arena.get_pointer(offset as usize);
    NodePtr::new(ptr, offset)
  }
}

impl<C: Comparator> SkipList<C> {
  /// Returns the node with the greatest key `<=` the given key, along with
  /// whether that key is equal. Descends from the highest populated level;
  /// every step either moves right along a level or drops one level, so the
  /// search always terminates.
  unsafe fn find_closest(&self, key: &[u8]) -> (NodePtr, bool) {
    let mut curr = self.head;
    let mut level = self.height() as usize - 1;

    loop {
      let next = self.get_next(curr, level);
      if next.is_null() {
        // Nothing further on this level.
        if level > 0 {
          level -= 1;
          continue;
        }
        return (curr, false);
      }

      let next_node = next.as_ptr();
      let next_key = next_node.get_key(&self.arena);
      match self.cmp.compare(next_key, key) {
        cmp::Ordering::Equal => return (next, true),
        // Keep moving right on this level.
        cmp::Ordering::Less => curr = next,
        cmp::Ordering::Greater => {
          if level > 0 {
            level -= 1;
            continue;
          }
          return (curr, false);
        }
      }
    }
  }

  /// Walks a single level from `start`, whose key must compare `<=` the
  /// given key, until the next node's key is `>=` it.
  ///
  /// When `found` is set, `node` is the node carrying the key itself;
  /// otherwise `node` is its left neighbour on this level and `next` the
  /// raw offset of the right neighbour (possibly null).
  unsafe fn find_neighbours(&self, start: NodePtr, level: usize, key: &[u8]) -> FindResult {
    let mut curr = start;

    loop {
      let next_offset = curr.next_offset(&self.arena, level);
      let next = NodePtr::new(self.arena.get_pointer(next_offset as usize), next_offset);
      if next.is_null() {
        return FindResult {
          node: curr,
          next: next_offset,
          found: false,
        };
      }

      let next_node = next.as_ptr();
      let next_key = next_node.get_key(&self.arena);
      match self.cmp.compare(next_key, key) {
        cmp::Ordering::Equal => {
          return FindResult {
            node: next,
            next: next_offset,
            found: true,
          }
        }
        cmp::Ordering::Greater => {
          return FindResult {
            node: curr,
            next: next_offset,
            found: false,
          }
        }
        cmp::Ordering::Less => curr = next,
      }
    }
  }

  fn insert_in(&self, key: &[u8], value: &[u8], height: u8) -> Result<(), Error> {
    let mut list_height = self.height();

    let mut prev = [NodePtr::NULL; MAX_HEIGHT + 1];
    let mut next_offsets = [0u32; MAX_HEIGHT + 1];
    prev[list_height as usize] = self.head;

    // Starting from the highest populated level, record the splice position
    // for every level on the way down, each search picking up where the one
    // above left off.
    unsafe {
      for i in (0..list_height as usize).rev() {
        let fr = self.find_neighbours(prev[i + 1], i, key);
        if fr.found {
          // The key already exists; rewrite the value in place instead of
          // creating a new node.
          return fr.node.as_ptr().set_value(&self.value_arena, value);
        }

        prev[i] = fr.node;
        next_offsets[i] = fr.next;
      }
    }

    let nd = Node::new_node_ptr(&self.arena, &self.value_arena, height, key, value)?;

    // If the new node is taller than the list, raise the list height. CAS
    // because other inserts race on it; the height never decreases.
    let height_u32 = height as u32;
    while height_u32 > list_height {
      match self.height.compare_exchange_weak(
        list_height,
        height_u32,
        Ordering::SeqCst,
        Ordering::Acquire,
      ) {
        Ok(_) => break,
        Err(h) => list_height = h,
      }
    }

    // Splice from the base level up: when the node first shows up on a
    // level, it is already linked on every level below, which is exactly
    // what a descending reader assumes.
    unsafe {
      for i in 0..height as usize {
        loop {
          if prev[i].is_null() {
            // The list was shorter than the new node when we searched, so
            // this level has not been discovered yet.
            let fr = self.find_neighbours(self.head, i, key);
            if fr.found {
              return self.lose_insert_race(fr.node, value);
            }
            prev[i] = fr.node;
            next_offsets[i] = fr.next;
          }

          nd.init_next_offset(&self.arena, i, next_offsets[i]);
          if prev[i].cas_next_offset(&self.arena, i, next_offsets[i], nd.offset) {
            break;
          }

          // CAS failed: another insert landed between our neighbours.
          // Recompute them from the old left node; it is unlikely that many
          // nodes were inserted between prev and next.
          let fr = self.find_neighbours(prev[i], i, key);
          if fr.found {
            return self.lose_insert_race(fr.node, value);
          }
          prev[i] = fr.node;
          next_offsets[i] = fr.next;
        }
      }
    }

    self.len.fetch_add(1, Ordering::AcqRel);
    Ok(())
  }

  /// Another writer spliced the same key first: rewrite that node's value
  /// and stop. The node we allocated stays behind in the arena.
  ///
  /// ## Safety
  /// - `winner` must not be null.
  #[cold]
  unsafe fn lose_insert_race(&self, winner: NodePtr, value: &[u8]) -> Result<(), Error> {
    #[cfg(feature = "tracing")]
    tracing::trace!(
      value_size = value.len(),
      "lost an insert race, rewriting the winning entry in place"
    );

    winner.as_ptr().set_value(&self.value_arena, value)
  }
}

#[inline]
fn random_height<R: Rng>(rng: &mut R) -> u8 {
  let mut h = 1;
  while (h as usize) < MAX_HEIGHT && rng.gen::<u32>() < HEIGHT_INCREASE {
    h += 1;
  }
  h
}

/// Result of a single-level neighbour search.
struct FindResult {
  node: NodePtr,
  next: u32,
  found: bool,
}
