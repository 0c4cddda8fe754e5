//! Directory entry list with offset slot allocation
//!
//! Entries live in an arena and are addressed by stable slot ids; each entry
//! carries explicit next/prev links, so removal given a slot id is O(1).
//!
//! Offsets are phony directory-read positions. They strictly increase from
//! head to tail, so a readdir cursor stays meaningful while entries come and
//! go. New entries take the first hole found from the roving pointer; once
//! the rover reaches the tail of a directory whose largest offset exceeds
//! twice the entry count (the directory is at least 50% holes) it is sent
//! back to the front. With N entries there are then N holes to fill, each
//! reached within 2N steps, so creation is amortized O(1).

extern crate alloc;
use alloc::{sync::Arc, vec::Vec};
use core::mem::size_of;

use crate::error::{CgrpError, CgrpResult};

/// Stable index of an entry inside one directory's arena
pub type SlotId = usize;

/// One (name -> node) binding inside a directory
#[derive(Debug)]
pub struct DirSlot<T> {
    pub name: Arc<str>,
    pub node: T,
    pub offset: u64,
    /// Name index hash, recorded when the entry is indexed
    pub hash: u32,
    next: Option<SlotId>,
    prev: Option<SlotId>,
}

/// Bytes a directory is charged for one entry named `name`
pub fn entry_size(name: &str) -> u64 {
    (size_of::<DirSlot<()>>() + name.len() + 1) as u64
}

/// Offset-ordered list of a directory's entries
#[derive(Debug)]
pub struct DirList<T> {
    slots: Vec<Option<DirSlot<T>>>,
    free: Vec<SlotId>,
    head: Option<SlotId>,
    rover: Option<SlotId>,
    count: u32,
    probes: u64,
}

impl<T> DirList<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            rover: None,
            count: 0,
            probes: 0,
        }
    }

    /// A list is live from dot/dotdot installation until it is truncated
    pub fn is_live(&self) -> bool {
        self.head.is_some()
    }

    /// Number of entries, "." and ".." included
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total forward steps taken by slot searches over the list's lifetime
    pub fn probes(&self) -> u64 {
        self.probes
    }

    pub fn get(&self, id: SlotId) -> Option<&DirSlot<T>> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub fn set_hash(&mut self, id: SlotId, hash: u32) {
        self.slot_mut(id).hash = hash;
    }

    fn slot(&self, id: SlotId) -> &DirSlot<T> {
        match self.slots.get(id).and_then(Option::as_ref) {
            Some(slot) => slot,
            None => unreachable!("cgrp dirent: dangling slot {}", id),
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut DirSlot<T> {
        match self.slots.get_mut(id).and_then(Option::as_mut) {
            Some(slot) => slot,
            None => unreachable!("cgrp dirent: dangling slot {}", id),
        }
    }

    fn alloc(&mut self, name: Arc<str>, node: T, offset: u64) -> CgrpResult<SlotId> {
        let slot = DirSlot {
            name,
            node,
            offset,
            hash: 0,
            next: None,
            prev: None,
        };
        if let Some(id) = self.free.pop() {
            self.slots[id] = Some(slot);
            return Ok(id);
        }
        self.slots.try_reserve(1).map_err(|_| CgrpError::NoSpace)?;
        self.free.try_reserve(1).map_err(|_| CgrpError::NoSpace)?;
        self.slots.push(Some(slot));
        Ok(self.slots.len() - 1)
    }

    /// Install "." and ".." at offsets 0 and 1; the rover starts at "..".
    pub fn install_dots(&mut self, dot: T, dotdot: T) -> CgrpResult<(SlotId, SlotId)> {
        debug_assert!(!self.is_live(), "cgrp dirent: dots installed twice");
        let d = self.alloc(Arc::from("."), dot, 0)?;
        let dd = self.alloc(Arc::from(".."), dotdot, 1)?;

        self.slot_mut(d).next = Some(dd);
        self.slot_mut(dd).prev = Some(d);
        self.head = Some(d);
        self.rover = Some(dd);
        self.count = 2;
        Ok((d, dd))
    }

    /// Insert an entry at the first free offset found from the rover.
    ///
    /// Fails with `NotFound` if the list was truncated and `NoSpace` if the
    /// entry cannot be allocated.
    pub fn insert(&mut self, name: Arc<str>, node: T) -> CgrpResult<SlotId> {
        let head = self.head.ok_or(CgrpError::NotFound)?;
        let id = self.alloc(name, node, 0)?;
        self.count += 1;

        let mut cur = self.rover.unwrap_or(head);
        loop {
            let c = self.slot(cur);
            match c.next {
                Some(n) if self.slot(n).offset - c.offset <= 1 => {
                    debug_assert!(self.slot(n).offset > c.offset);
                    cur = n;
                    self.probes += 1;
                }
                _ => break,
            }
        }

        let (cur_offset, cur_next) = {
            let c = self.slot(cur);
            (c.offset, c.next)
        };

        if cur_next.is_none() && cur_offset > 2 * u64::from(self.count) {
            self.rover = self.slot(head).next;
            log::trace!(
                "cgrp dirent: rover reset, last offset {} entries {}",
                cur_offset,
                self.count
            );
        } else {
            self.rover = Some(id);
        }

        {
            let new = self.slot_mut(id);
            new.offset = cur_offset + 1;
            new.next = cur_next;
            new.prev = Some(cur);
        }
        if let Some(n) = cur_next {
            self.slot_mut(n).prev = Some(id);
        }
        self.slot_mut(cur).next = Some(id);
        Ok(id)
    }

    /// Take an entry out of the list and release its slot
    pub fn unlink(&mut self, id: SlotId) -> DirSlot<T> {
        let slot = match self.slots.get_mut(id).and_then(Option::take) {
            Some(slot) => slot,
            None => unreachable!("cgrp dirent: unlinking free slot {}", id),
        };
        if let Some(p) = slot.prev {
            self.slot_mut(p).next = slot.next;
        }
        if let Some(n) = slot.next {
            self.slot_mut(n).prev = slot.prev;
        }
        if self.head == Some(id) {
            self.head = slot.next;
        }
        if self.rover == Some(id) {
            self.rover = slot.prev;
        }
        self.count -= 1;

        if self.head.is_none() {
            self.slots.clear();
            self.free.clear();
            self.rover = None;
        } else {
            self.free.push(id);
        }
        slot
    }

    /// Remove the first entry, returning the slot id it occupied
    pub fn pop_front(&mut self) -> Option<(SlotId, DirSlot<T>)> {
        let head = self.head?;
        Some((head, self.unlink(head)))
    }

    /// Entries in offset order
    pub fn iter(&self) -> DirIter<'_, T> {
        DirIter {
            list: self,
            cur: self.head,
        }
    }
}

impl<T> Default for DirList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset-ordered iterator over a directory list
pub struct DirIter<'a, T> {
    list: &'a DirList<T>,
    cur: Option<SlotId>,
}

impl<'a, T> Iterator for DirIter<'a, T> {
    type Item = (SlotId, &'a DirSlot<T>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let slot = self.list.slot(id);
        self.cur = slot.next;
        Some((id, slot))
    }
}
