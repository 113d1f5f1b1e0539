//! Recency list for LRU ordering
//!
//! Circular doubly-linked list stored in a slab. Slot 0 is the sentinel, so an
//! empty list is the sentinel linked to itself. Links are slab indices, and
//! freed slots are recycled through a free list.

const SENTINEL: usize = 0;

/// Slot in the slab; `item` is `None` for the sentinel and for free slots
struct Slot<T> {
    item: Option<T>,
    prev: usize,
    next: usize,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            item: None,
            prev: SENTINEL,
            next: SENTINEL,
        }
    }
}

/// Most recently used item at the head, least recently used at the tail
pub(crate) struct RecencyList<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<usize>,
    len: usize,
}

impl<T> RecencyList<T> {
    /// Create an empty list holding only the sentinel
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::vacant()],
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Handle of the least recently used item
    pub fn back(&self) -> Option<usize> {
        if self.len == 0 {
            None
        } else {
            Some(self.slots[SENTINEL].prev)
        }
    }

    /// Handle of the most recently used item
    #[cfg(test)]
    pub fn front(&self) -> Option<usize> {
        if self.len == 0 {
            None
        } else {
            Some(self.slots[SENTINEL].next)
        }
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(|slot| slot.item.as_ref())
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx).and_then(|slot| slot.item.as_mut())
    }

    /// Insert an item at the head and return its handle
    pub fn push_front(&mut self, item: T) -> usize {
        let idx = self.alloc_slot();
        self.slots[idx].item = Some(item);
        self.link_after(idx, SENTINEL);
        self.len += 1;
        idx
    }

    /// Promote a live item to the head
    pub fn move_to_front(&mut self, idx: usize) {
        if self.get(idx).is_none() || self.slots[SENTINEL].next == idx {
            return; // Vacant or already at front
        }

        self.unlink(idx);
        self.link_after(idx, SENTINEL);
    }

    /// Unlink an item and release its slot
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        let item = self.slots.get_mut(idx)?.item.take()?;
        self.unlink(idx);
        self.free_list.push(idx);
        self.len -= 1;
        Some(item)
    }

    /// Iterate from the tail (oldest) to the head (newest)
    pub fn iter_oldest(&self) -> impl Iterator<Item = &T> + '_ {
        let slots = &self.slots;
        let mut cursor = slots[SENTINEL].prev;
        std::iter::from_fn(move || {
            if cursor == SENTINEL {
                return None;
            }
            let slot = &slots[cursor];
            cursor = slot.prev;
            slot.item.as_ref()
        })
    }

    /// Take every item, oldest first, and reset the slab
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        let mut cursor = self.slots[SENTINEL].prev;
        while cursor != SENTINEL {
            let prev = self.slots[cursor].prev;
            if let Some(item) = self.slots[cursor].item.take() {
                items.push(item);
            }
            cursor = prev;
        }

        self.slots.truncate(1);
        self.slots[SENTINEL] = Slot::vacant();
        self.free_list.clear();
        self.len = 0;
        items
    }

    fn alloc_slot(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            self.slots.push(Slot::vacant());
            self.slots.len() - 1
        }
    }

    fn link_after(&mut self, idx: usize, at: usize) {
        let next = self.slots[at].next;
        self.slots[idx].prev = at;
        self.slots[idx].next = next;
        self.slots[at].next = idx;
        self.slots[next].prev = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.slots[idx].prev = SENTINEL;
        self.slots[idx].next = SENTINEL;
    }
}
