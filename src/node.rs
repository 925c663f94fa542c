use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

pub(crate) type NodeRef<V> = Arc<TrieNode<V>>;

/// Marker returned when an operation touched a node that has been detached or
/// replaced. The caller restarts from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Retired;

pub(crate) enum Slot<V> {
    Vacant,
    Occupied(Arc<V>),
    /// The node was replaced or detached. Writers restart; iterators that
    /// already hold the node still read the last value.
    Retired(Option<Arc<V>>),
}

/// Lock-free value slot of a node.
///
/// All transitions go through `compare_and_swap`, so a reader never sees a torn
/// value and two racing removers agree on a single winner.
pub(crate) struct ValueCell<V>(ArcSwap<Slot<V>>);

impl<V> ValueCell<V> {
    pub(crate) fn new(value: Option<Arc<V>>) -> Self {
        let slot = match value {
            Some(value) => Slot::Occupied(value),
            None => Slot::Vacant,
        };
        ValueCell(ArcSwap::from_pointee(slot))
    }

    fn cas(&self, current: &Arc<Slot<V>>, next: Slot<V>) -> bool {
        let prev = self.0.compare_and_swap(current, Arc::new(next));
        Arc::ptr_eq(&*prev, current)
    }

    pub(crate) fn load(&self) -> Result<Option<Arc<V>>, Retired> {
        match &**self.0.load() {
            Slot::Vacant => Ok(None),
            Slot::Occupied(value) => Ok(Some(Arc::clone(value))),
            Slot::Retired(_) => Err(Retired),
        }
    }

    /// Reads the value even if the slot is retired.
    pub(crate) fn peek(&self) -> Option<Arc<V>> {
        match &**self.0.load() {
            Slot::Occupied(value) | Slot::Retired(Some(value)) => Some(Arc::clone(value)),
            Slot::Vacant | Slot::Retired(None) => None,
        }
    }

    pub(crate) fn is_vacant(&self) -> bool {
        matches!(&**self.0.load(), Slot::Vacant)
    }

    /// Stores `value` unconditionally, returning what it replaced.
    pub(crate) fn store(&self, value: &Arc<V>) -> Result<Option<Arc<V>>, Retired> {
        loop {
            let current = self.0.load_full();
            let previous = match &*current {
                Slot::Retired(_) => return Err(Retired),
                Slot::Vacant => None,
                Slot::Occupied(prev) => Some(Arc::clone(prev)),
            };
            if self.cas(&current, Slot::Occupied(Arc::clone(value))) {
                return Ok(previous);
            }
        }
    }

    /// Returns the stored value, or stores the one produced by `make`.
    ///
    /// `make` is only called while the slot is observed vacant; it may be
    /// called again after a lost race, so callers cache what it produces.
    pub(crate) fn get_or_store_with(
        &self,
        mut make: impl FnMut() -> Arc<V>,
    ) -> Result<Arc<V>, Retired> {
        loop {
            let current = self.0.load_full();
            match &*current {
                Slot::Retired(_) => return Err(Retired),
                Slot::Occupied(value) => return Ok(Arc::clone(value)),
                Slot::Vacant => {
                    let value = make();
                    if self.cas(&current, Slot::Occupied(Arc::clone(&value))) {
                        return Ok(value);
                    }
                }
            }
        }
    }

    /// Tombstone-and-fetch: clears an occupied slot. Only the caller that
    /// actually cleared the value gets `Some`.
    pub(crate) fn take(&self) -> Result<Option<Arc<V>>, Retired> {
        loop {
            let current = self.0.load_full();
            match &*current {
                Slot::Retired(_) => return Err(Retired),
                Slot::Vacant => return Ok(None),
                Slot::Occupied(value) => {
                    let value = Arc::clone(value);
                    if self.cas(&current, Slot::Vacant) {
                        return Ok(Some(value));
                    }
                }
            }
        }
    }

    /// Retires a vacant slot. Fails if a value was stored in the meantime.
    pub(crate) fn retire_if_vacant(&self) -> bool {
        let current = self.0.load_full();
        matches!(&*current, Slot::Vacant) && self.cas(&current, Slot::Retired(None))
    }

    /// Retires the slot and hands back whatever value it held. The value stays
    /// readable through [`ValueCell::peek`].
    pub(crate) fn retire(&self) -> Option<Arc<V>> {
        loop {
            let current = self.0.load_full();
            let value = match &*current {
                Slot::Occupied(value) => Some(Arc::clone(value)),
                Slot::Vacant => None,
                Slot::Retired(_) => return None,
            };
            if self.cas(&current, Slot::Retired(value.clone())) {
                return value;
            }
        }
    }
}

pub(crate) struct Children<V> {
    pub(crate) map: BTreeMap<char, NodeRef<V>>,
    pub(crate) retired: bool,
}

impl<V> Children<V> {
    pub(crate) fn live(&self) -> Result<&BTreeMap<char, NodeRef<V>>, Retired> {
        if self.retired {
            Err(Retired)
        } else {
            Ok(&self.map)
        }
    }

    /// Marks the owning node as retired and returns its children for the
    /// replacement. The retired node keeps its final map for iterators.
    pub(crate) fn retire(&mut self) -> BTreeMap<char, NodeRef<V>> {
        self.retired = true;
        self.map.clone()
    }
}

/// One edge-compressed segment of key space.
///
/// The label never changes after construction. Restructuring that needs a
/// different label builds a replacement node with [`TrieNode::relocate`].
pub(crate) struct TrieNode<V> {
    pub(crate) label: Box<str>,
    pub(crate) value: ValueCell<V>,
    pub(crate) children: RwLock<Children<V>>,
}

impl<V> TrieNode<V> {
    pub(crate) fn new(
        label: impl Into<Box<str>>,
        value: Option<Arc<V>>,
        map: BTreeMap<char, NodeRef<V>>,
    ) -> NodeRef<V> {
        Arc::new(TrieNode {
            label: label.into(),
            value: ValueCell::new(value),
            children: RwLock::new(Children { map, retired: false }),
        })
    }

    pub(crate) fn root() -> NodeRef<V> {
        Self::new("", None, BTreeMap::new())
    }

    pub(crate) fn leaf(label: &str, value: Arc<V>) -> NodeRef<V> {
        Self::new(label, Some(value), BTreeMap::new())
    }

    pub(crate) fn first_char(&self) -> Option<char> {
        crate::key::first_char(&self.label)
    }

    /// Looks up the child starting with `c` under a brief read lock.
    pub(crate) fn child(&self, c: char) -> Result<Option<NodeRef<V>>, Retired> {
        let guard = self.children.read();
        Ok(guard.live()?.get(&c).cloned())
    }

    /// Copies the current children under a brief read lock. A retired node
    /// yields the children it had when it was retired.
    pub(crate) fn snapshot(&self) -> Vec<NodeRef<V>> {
        self.children.read().map.values().cloned().collect()
    }

    /// Moves this node's value and children into a fresh node labelled `label`
    /// and retires this one.
    ///
    /// The caller must hold the write lock of this node (passed as `guard`) and
    /// of its parent, so nobody can observe both copies as live.
    pub(crate) fn relocate(
        &self,
        guard: &mut Children<V>,
        label: impl Into<Box<str>>,
    ) -> NodeRef<V> {
        let value = self.value.retire();
        let map = guard.retire();
        Self::new(label, value, map)
    }
}
