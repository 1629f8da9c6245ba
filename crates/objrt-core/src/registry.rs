//! Image registry.
//!
//! A singly linked list of [`HeaderInfo`] records in load order, with head,
//! tail and a count, all behind one gated lock. Nodes live in a slot vector
//! and link by index; freed slots are reused.
//!
//! The registry lock is the serialization point for every image add and
//! remove. Closures passed to [`HeaderRegistry::for_each`] and friends run
//! with that lock held and must not call back into the registry.

use std::sync::Arc;

use crate::debugger::{DebuggerGate, LockId};
use crate::image::HeaderInfo;
use crate::lock::{Guarded, Mutex};

#[derive(Debug)]
struct Node {
    header: HeaderInfo,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct HeaderList {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    first: Option<usize>,
    last: Option<usize>,
    count: usize,
}

impl HeaderList {
    fn node(&self, index: usize) -> Option<&Node> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    fn append(&mut self, header: HeaderInfo) {
        let node = Node { header, next: None };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                index
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        match self.last {
            Some(tail) => {
                if let Some(tail) = self.node_mut(tail) {
                    tail.next = Some(index);
                }
            }
            None => self.first = Some(index),
        }
        self.last = Some(index);
        self.count += 1;
    }

    fn remove(&mut self, addr: usize) -> Option<HeaderInfo> {
        let mut prev = None;
        let mut cursor = self.first;
        while let Some(index) = cursor {
            let node = self.node(index)?;
            if node.header.addr() == addr {
                break;
            }
            prev = Some(index);
            cursor = node.next;
        }
        let index = cursor?;
        let node = self.slots[index].take()?;

        match prev {
            Some(prev) => {
                if let Some(before) = self.node_mut(prev) {
                    before.next = node.next;
                }
            }
            None => self.first = node.next,
        }
        if self.last == Some(index) {
            self.last = prev;
        }
        self.free.push(index);
        self.count -= 1;
        Some(node.header)
    }

    fn iter(&self) -> impl Iterator<Item = &HeaderInfo> + '_ {
        let mut cursor = self.first;
        core::iter::from_fn(move || {
            let node = self.node(cursor?)?;
            cursor = node.next;
            Some(&node.header)
        })
    }

    fn find_mut(&mut self, addr: usize) -> Option<&mut HeaderInfo> {
        let mut cursor = self.first;
        while let Some(index) = cursor {
            let node = self.node(index)?;
            if node.header.addr() == addr {
                return self.node_mut(index).map(|node| &mut node.header);
            }
            cursor = node.next;
        }
        None
    }
}

/// Registry of loaded images carrying runtime metadata.
pub struct HeaderRegistry {
    list: Guarded<HeaderList>,
}

impl HeaderRegistry {
    /// Name of the registry lock in diagnostics.
    pub const LOCK_NAME: &'static str = "headerLock";

    pub fn new(gate: Arc<DebuggerGate>) -> Self {
        Self {
            list: Guarded::new(Mutex::new(Self::LOCK_NAME, gate), HeaderList::default()),
        }
    }

    /// The registry lock.
    #[must_use]
    pub fn lock(&self) -> &Mutex {
        self.list.lock()
    }

    #[must_use]
    pub fn lock_id(&self) -> LockId {
        self.list.lock().id()
    }

    /// Insert at the tail.
    pub fn append(&self, header: HeaderInfo) {
        log::debug!("objrt: registry append {}", header.name());
        self.list.with(|list| list.append(header));
    }

    /// Splice out the image whose header is mapped at `addr`. Absent images
    /// are a no-op.
    pub fn remove(&self, addr: usize) -> Option<HeaderInfo> {
        let removed = self.list.with(|list| list.remove(addr));
        if let Some(header) = &removed {
            log::debug!("objrt: registry remove {}", header.name());
        }
        removed
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.list.with(|list| list.count)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.list.with(|list| list.iter().any(|hi| hi.addr() == addr))
    }

    /// Copy of every record, in load order, taken under the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HeaderInfo> {
        self.list.with(|list| list.iter().cloned().collect())
    }

    /// Visit every record in load order with the lock held.
    pub fn for_each(&self, mut f: impl FnMut(&HeaderInfo)) {
        self.list.with(|list| list.iter().for_each(|hi| f(hi)));
    }

    #[must_use]
    pub fn find(&self, addr: usize) -> Option<HeaderInfo> {
        self.find_map(|hi| (hi.addr() == addr).then(|| hi.clone()))
    }

    /// First `Some` produced by `f`, in load order.
    pub fn find_map<R>(&self, mut f: impl FnMut(&HeaderInfo) -> Option<R>) -> Option<R> {
        self.list.with(|list| list.iter().find_map(|hi| f(hi)))
    }

    /// Path of the image whose mapped range contains `addr`.
    #[must_use]
    pub fn path_containing(&self, addr: usize) -> Option<String> {
        self.find_map(|hi| hi.mhdr.contains(addr).then(|| hi.name().to_string()))
    }

    /// Mutate the record for `addr`; `false` if absent.
    pub fn update(&self, addr: usize, f: impl FnOnce(&mut HeaderInfo)) -> bool {
        self.list.with(|list| match list.find_mut(addr) {
            Some(hi) => {
                f(hi);
                true
            }
            None => false,
        })
    }

    pub fn set_all_classes_realized(&self, addr: usize, realized: bool) -> bool {
        self.update(addr, |hi| hi.all_classes_realized = realized)
    }

    #[must_use]
    pub fn first(&self) -> Option<HeaderInfo> {
        self.list
            .with(|list| list.first.and_then(|i| list.node(i)).map(|n| n.header.clone()))
    }

    #[must_use]
    pub fn last(&self) -> Option<HeaderInfo> {
        self.list
            .with(|list| list.last.and_then(|i| list.node(i)).map(|n| n.header.clone()))
    }
}

impl core::fmt::Debug for HeaderRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeaderRegistry")
            .field("lock", self.lock())
            .finish_non_exhaustive()
    }
}
