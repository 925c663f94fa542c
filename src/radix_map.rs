use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, trace, warn};

use crate::config::{Config, RadixMapBuilder};
use crate::error::{Error, Result};
use crate::iter::{Iter, Keys, Values};
use crate::key::{first_char, shared_prefix_len};
use crate::node::{NodeRef, Retired, TrieNode, ValueCell};

/// A concurrent radix tree (compressed trie) mapping string keys to values.
///
/// Every operation takes `&self`; share the map between threads with an
/// [`Arc`]. Values are handed out as `Arc<V>`.
///
/// # Features
///
/// - Point lookups that only take short per-node read locks
/// - Insertion that splits labels on divergence and never locks more than the
///   node being restructured
/// - Removal that merges single-child chains back together
/// - Lazy prefix search and atomic prefix pruning
///
/// # Examples
///
/// ```
/// use radixmap::RadixMap;
///
/// let map = RadixMap::new();
///
/// map.insert("apple", 1).unwrap();
/// map.insert("application", 2).unwrap();
/// map.insert("banana", 3).unwrap();
///
/// assert_eq!(map.get("apple").as_deref(), Some(&1));
/// assert!(map.get("app").is_none());
///
/// let keys: Vec<String> = map.search_keys("app").collect();
/// assert_eq!(keys, ["apple", "application"]);
///
/// let (pruned, subtree) = map.prune("banana");
/// assert!(pruned);
/// assert_eq!(subtree.get("banana").as_deref(), Some(&3));
/// assert!(map.get("banana").is_none());
/// ```
pub struct RadixMap<V> {
    root: ArcSwap<TrieNode<V>>,
    gate: RwLock<()>,
    config: Config,
}

/// Where a key ends up when walked from the root.
struct Descent<V> {
    /// Root first; every node after the root had its whole label matched.
    path: Vec<NodeRef<V>>,
    /// Bytes of the key consumed by `path`.
    matched: usize,
    /// Child whose label extends past the end of the key, if the key stops
    /// inside a label.
    overshoot: Option<NodeRef<V>>,
}

impl<V> Descent<V> {
    fn is_exact(&self, key: &str) -> bool {
        self.matched == key.len()
    }
}

struct Upserted<V> {
    stored: Arc<V>,
    previous: Option<Arc<V>>,
}

/// Writes `value` into an existing node. Without `overwrite` a value already
/// present wins and is returned instead.
fn write_into<V>(
    cell: &ValueCell<V>,
    value: &Arc<V>,
    overwrite: bool,
) -> Result<Upserted<V>, Retired> {
    if overwrite {
        let previous = cell.store(value)?;
        Ok(Upserted { stored: Arc::clone(value), previous })
    } else {
        let stored = cell.get_or_store_with(|| Arc::clone(value))?;
        Ok(Upserted { stored, previous: None })
    }
}

enum Attached<V> {
    Done(Upserted<V>),
    /// A matching child appeared while we were waiting for the lock.
    Descend,
}

fn adopt<V>(map: &mut BTreeMap<char, NodeRef<V>>, node: NodeRef<V>) {
    debug_assert!(!node.label.is_empty(), "only the root has an empty label");
    if let Some(c) = node.first_char() {
        map.insert(c, node);
    }
}

fn maps_to<V>(map: &BTreeMap<char, NodeRef<V>>, node: &NodeRef<V>) -> bool {
    node.first_char()
        .and_then(|c| map.get(&c))
        .is_some_and(|mapped| Arc::ptr_eq(mapped, node))
}

impl<V> Default for RadixMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for RadixMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: AsRef<str>, V> Extend<(K, V)> for RadixMap<V> {
    /// Inserts every pair. Pairs with an empty key are skipped.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            if let Err(err) = self.insert(key.as_ref(), value) {
                warn!(%err, "skipping entry");
            }
        }
    }
}

impl<K: AsRef<str>, V> FromIterator<(K, V)> for RadixMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = RadixMap::new();
        map.extend(iter);
        map
    }
}

impl<'a, V> IntoIterator for &'a RadixMap<V> {
    type Item = (String, Arc<V>);
    type IntoIter = Iter<V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V> RadixMap<V> {
    /// Creates an empty map with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty map with the given configuration.
    ///
    /// The configuration is not validated here; use [`RadixMap::builder`] or
    /// [`Config::validate`] for that. A retry bound of zero makes every
    /// mutating call run exclusively.
    pub fn with_config(config: Config) -> Self {
        Self::from_root(TrieNode::root(), config)
    }

    pub fn builder() -> RadixMapBuilder<V> {
        RadixMapBuilder::new()
    }

    fn from_root(root: NodeRef<V>, config: Config) -> Self {
        RadixMap {
            root: ArcSwap::new(root),
            gate: RwLock::new(()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn normalize<'k>(&self, key: &'k str, op: &'static str) -> Result<Cow<'k, str>> {
        if key.is_empty() {
            return Err(Error::EmptyKey { op });
        }
        Ok(self.config.key_policy.normalize(key))
    }

    /// Runs a mutating step until it completes.
    ///
    /// Steps run optimistically under the shared side of the structure gate and
    /// are restarted from the root whenever they hit a retired node. Once the
    /// retry bound is spent the step runs under the exclusive side, where no
    /// other mutator can move nodes around it.
    fn mutate<T>(
        &self,
        op: &'static str,
        mut step: impl FnMut(&NodeRef<V>) -> Result<T, Retired>,
    ) -> T {
        for attempt in 0..self.config.max_optimistic_retries {
            let _shared = self.gate.read();
            match step(&self.root.load_full()) {
                Ok(out) => return out,
                Err(Retired) => trace!(op, attempt, "hit a retired node, restarting"),
            }
        }

        warn!(
            op,
            retries = self.config.max_optimistic_retries,
            "optimistic retries exhausted, running exclusively"
        );
        let _exclusive = self.gate.write();
        loop {
            if let Ok(out) = step(&self.root.load_full()) {
                return out;
            }
        }
    }

    fn descend(&self, root: &NodeRef<V>, key: &str) -> Result<Descent<V>, Retired> {
        let mut path = vec![Arc::clone(root)];
        let mut matched = 0;

        loop {
            let rest = &key[matched..];
            let Some(c) = first_char(rest) else {
                return Ok(Descent { path, matched, overshoot: None });
            };
            let Some(node) = path.last() else {
                return Ok(Descent { path, matched, overshoot: None });
            };
            let Some(child) = node.child(c)? else {
                return Ok(Descent { path, matched, overshoot: None });
            };

            if rest.starts_with(&*child.label) {
                matched += child.label.len();
                path.push(child);
            } else {
                let overshoot = child.label.starts_with(rest).then_some(child);
                return Ok(Descent { path, matched, overshoot });
            }
        }
    }

    fn lookup(root: &NodeRef<V>, key: &str) -> Result<Option<Arc<V>>, Retired> {
        let mut node = Arc::clone(root);
        let mut rest = key;

        while let Some(c) = first_char(rest) {
            let Some(child) = node.child(c)? else {
                return Ok(None);
            };
            let Some(tail) = rest.strip_prefix(&*child.label) else {
                return Ok(None);
            };
            rest = tail;
            node = child;
        }

        node.value.load()
    }

    /// Returns the value stored under `key`.
    ///
    /// Matching is exact. The empty key addresses the root, which never holds a
    /// value through this API.
    ///
    /// # Examples
    ///
    /// ```
    /// # use radixmap::RadixMap;
    /// let map = RadixMap::new();
    /// map.insert("a", 1).unwrap();
    /// map.insert("abc", 3).unwrap();
    ///
    /// assert_eq!(map.get("a").as_deref(), Some(&1));
    /// assert_eq!(map.get("abc").as_deref(), Some(&3));
    /// assert_eq!(map.get("ab"), None);
    /// ```
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let key = self.config.key_policy.normalize(key);
        loop {
            if let Ok(found) = Self::lookup(&self.root.load_full(), &key) {
                return found;
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn upsert(
        &self,
        root: &NodeRef<V>,
        key: &str,
        value: &Arc<V>,
        overwrite: bool,
    ) -> Result<Upserted<V>, Retired> {
        let mut node = Arc::clone(root);
        let mut rest = key;

        loop {
            let Some(c) = first_char(rest) else {
                return write_into(&node.value, value, overwrite);
            };

            if let Some(child) = node.child(c)? {
                if let Some(tail) = rest.strip_prefix(&*child.label) {
                    rest = tail;
                    node = child;
                    continue;
                }
            }

            match Self::attach(&node, c, rest, value)? {
                Attached::Done(upserted) => return Ok(upserted),
                Attached::Descend => continue,
            }
        }
    }

    /// Adds `rest` below `node`, either as a fresh leaf or by splitting the
    /// child that shares its first character.
    fn attach(
        node: &NodeRef<V>,
        c: char,
        rest: &str,
        value: &Arc<V>,
    ) -> Result<Attached<V>, Retired> {
        let guard = node.children.upgradable_read();

        let Some(child) = guard.live()?.get(&c).cloned() else {
            let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
            guard.map.insert(c, TrieNode::leaf(rest, Arc::clone(value)));
            trace!(label = rest, "attached leaf");
            let stored = Arc::clone(value);
            return Ok(Attached::Done(Upserted { stored, previous: None }));
        };

        if rest.starts_with(&*child.label) {
            return Ok(Attached::Descend);
        }

        let split_at = shared_prefix_len(&child.label, rest);
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        let mut child_guard = child.children.write();
        if child_guard.retired {
            return Err(Retired);
        }

        let mut map = BTreeMap::new();
        adopt(&mut map, child.relocate(&mut child_guard, &child.label[split_at..]));
        drop(child_guard);

        let (prefix, remainder) = rest.split_at(split_at);
        let split_value = if remainder.is_empty() {
            Some(Arc::clone(value))
        } else {
            adopt(&mut map, TrieNode::leaf(remainder, Arc::clone(value)));
            None
        };
        guard.map.insert(c, TrieNode::new(prefix, split_value, map));
        trace!(label = %child.label, at = split_at, "split node");

        let stored = Arc::clone(value);
        Ok(Attached::Done(Upserted { stored, previous: None }))
    }

    /// Inserts a key-value pair, returning the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyKey`] if `key` is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use radixmap::RadixMap;
    /// let map = RadixMap::new();
    /// assert_eq!(map.insert("a", 1).unwrap(), None);
    /// assert_eq!(map.insert("a", 2).unwrap().as_deref(), Some(&1));
    /// assert_eq!(map.get("a").as_deref(), Some(&2));
    /// assert!(map.insert("", 3).is_err());
    /// ```
    pub fn insert(&self, key: &str, value: V) -> Result<Option<Arc<V>>> {
        let key = self.normalize(key, "insert")?;
        let value = Arc::new(value);
        let upserted = self.mutate("insert", |root| self.upsert(root, &key, &value, true));
        Ok(upserted.previous)
    }

    /// Returns the value stored under `key`, storing `value` first if the key is
    /// absent. Every racing caller gets back the value that ended up stored.
    pub fn get_or_insert(&self, key: &str, value: V) -> Result<Arc<V>> {
        self.get_or_insert_with(key, move || value)
    }

    /// Like [`get_or_insert`](Self::get_or_insert), but only builds the value
    /// when the key was observed missing.
    ///
    /// `make` runs before any lock is taken, so it may use the map itself. If
    /// another caller stores a value first, the built one is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// # use radixmap::RadixMap;
    /// let map = RadixMap::new();
    /// let first = map.get_or_insert_with("lock:a", || 1).unwrap();
    /// let second = map.get_or_insert_with("lock:a", || unreachable!()).unwrap();
    /// assert_eq!((*first, *second), (1, 1));
    /// ```
    pub fn get_or_insert_with<F: FnOnce() -> V>(&self, key: &str, make: F) -> Result<Arc<V>> {
        let key = self.normalize(key, "get_or_insert")?;
        if let Some(found) = self.get(&key) {
            return Ok(found);
        }
        let value = Arc::new(make());
        let upserted = self.mutate("get_or_insert", |root| {
            self.upsert(root, &key, &value, false)
        });
        Ok(upserted.stored)
    }

    /// Removes `key`, returning its value. Removing an absent key does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyKey`] if `key` is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use radixmap::RadixMap;
    /// let map = RadixMap::new();
    /// map.insert("a", 1).unwrap();
    /// map.insert("ab", 2).unwrap();
    /// map.insert("abc", 3).unwrap();
    ///
    /// assert_eq!(map.remove("ab").unwrap().as_deref(), Some(&2));
    /// assert_eq!(map.remove("ab").unwrap(), None);
    /// assert_eq!(map.get("a").as_deref(), Some(&1));
    /// assert_eq!(map.get("abc").as_deref(), Some(&3));
    /// ```
    pub fn remove(&self, key: &str) -> Result<Option<Arc<V>>> {
        let key = self.normalize(key, "remove")?;

        let removed = self.mutate("remove", |root| {
            let descent = self.descend(root, &key)?;
            match descent.path.last() {
                Some(node) if descent.is_exact(&key) => node.value.take(),
                _ => Ok(None),
            }
        });

        if removed.is_some() {
            self.tidy_upwards(&key);
        }
        Ok(removed)
    }

    /// Restores the compaction invariant at `key` and, if that detaches a node,
    /// at each ancestor left without a value and with fewer than two children.
    fn tidy_upwards(&self, key: &str) {
        let mut pending = Some(key.len());
        while let Some(len) = pending {
            let key = &key[..len];
            pending = self.mutate("tidy", |root| {
                let descent = self.descend(root, key)?;
                if !descent.is_exact(key) {
                    return Ok(None);
                }
                Self::tidy(&descent.path, key.len())
            });
        }
    }

    /// Detaches or merges the last node of `path` if it is vacant and has at
    /// most one child. Returns the key length of the parent when the parent
    /// needs the same treatment afterwards.
    fn tidy(path: &[NodeRef<V>], key_len: usize) -> Result<Option<usize>, Retired> {
        let [.., parent, node] = path else {
            return Ok(None);
        };
        let Some(c) = node.first_char() else {
            return Ok(None);
        };

        let mut parent_guard = parent.children.write();
        if !maps_to(parent_guard.live()?, node) {
            return Err(Retired);
        }
        let mut node_guard = node.children.write();
        if node_guard.retired {
            return Err(Retired);
        }
        if !node.value.is_vacant() {
            return Ok(None);
        }

        match node_guard.map.len() {
            0 => {
                if !node.value.retire_if_vacant() {
                    return Ok(None);
                }
                node_guard.retire();
                parent_guard.map.remove(&c);
                trace!(label = %node.label, "detached empty node");

                let parent_is_root = path.len() < 3;
                let cascade =
                    !parent_is_root && parent.value.is_vacant() && parent_guard.map.len() < 2;
                Ok(cascade.then(|| key_len - node.label.len()))
            }
            1 => {
                let Some(child) = node_guard.map.values().next().cloned() else {
                    return Ok(None);
                };
                let mut child_guard = child.children.write();
                if child_guard.retired || !node.value.retire_if_vacant() {
                    return Ok(None);
                }
                let label = format!("{}{}", node.label, child.label);
                let merged = child.relocate(&mut child_guard, label);
                node_guard.retire();
                trace!(label = %merged.label, "merged single-child node");
                parent_guard.map.insert(c, merged);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Returns a lazy iterator over every entry whose key starts with `prefix`.
    ///
    /// Entries come out in pre-order, children in code point order. Each node's
    /// children are copied when the iterator reaches it, so the iterator never
    /// holds a lock between calls and sees a consistent view per node rather
    /// than a global snapshot.
    ///
    /// # Examples
    ///
    /// ```
    /// # use radixmap::RadixMap;
    /// let map = RadixMap::new();
    /// map.insert("team", 1).unwrap();
    /// map.insert("tea", 2).unwrap();
    /// map.insert("ten", 3).unwrap();
    ///
    /// let found: Vec<_> = map.search("te").map(|(k, v)| (k, *v)).collect();
    /// let expected = [("tea", 2), ("team", 1), ("ten", 3)].map(|(k, v)| (k.to_string(), v));
    /// assert_eq!(found, expected);
    /// assert_eq!(map.search("tx").count(), 0);
    /// ```
    pub fn search(&self, prefix: &str) -> Iter<V> {
        let prefix = self.config.key_policy.normalize(prefix);
        loop {
            if let Ok(iter) = self.search_from(&self.root.load_full(), &prefix) {
                return iter;
            }
        }
    }

    fn search_from(&self, root: &NodeRef<V>, prefix: &str) -> Result<Iter<V>, Retired> {
        let descent = self.descend(root, prefix)?;
        if descent.is_exact(prefix) {
            let Some(node) = descent.path.last() else {
                return Ok(Iter::empty());
            };
            return Ok(Iter::new(prefix.to_string(), Arc::clone(node)));
        }
        Ok(match descent.overshoot {
            Some(node) => {
                let key = format!("{}{}", &prefix[..descent.matched], node.label);
                Iter::new(key, node)
            }
            None => Iter::empty(),
        })
    }

    pub fn search_keys(&self, prefix: &str) -> Keys<V> {
        Keys { inner: self.search(prefix) }
    }

    pub fn search_values(&self, prefix: &str) -> Values<V> {
        Values { inner: self.search(prefix) }
    }

    /// Returns `true` if any key starts with `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.search(prefix).next().is_some()
    }

    /// Detaches the subtree rooted exactly at `prefix` and returns it as an
    /// independent map that keeps the original, full keys.
    ///
    /// Returns `false` with an empty map when `prefix` does not end on a node
    /// boundary (absent, or inside a label), including when a concurrent
    /// removal or prune took it first. Splits and merges around the prefix are
    /// retried. The empty prefix detaches the whole tree.
    ///
    /// # Examples
    ///
    /// ```
    /// # use radixmap::RadixMap;
    /// let map = RadixMap::new();
    /// map.insert("user:1", 1).unwrap();
    /// map.insert("user:2", 2).unwrap();
    /// map.insert("group:1", 3).unwrap();
    ///
    /// let (pruned, users) = map.prune("user:");
    /// assert!(pruned);
    /// assert_eq!(users.keys().collect::<Vec<_>>(), ["user:1", "user:2"]);
    /// assert_eq!(map.keys().collect::<Vec<_>>(), ["group:1"]);
    ///
    /// // "gro" ends inside the label "group:1"
    /// assert!(!map.prune("gro").0);
    /// ```
    pub fn prune(&self, prefix: &str) -> (bool, RadixMap<V>) {
        let prefix = self.config.key_policy.normalize(prefix);
        if prefix.is_empty() {
            let old = self.root.swap(TrieNode::root());
            debug!("pruned the whole tree");
            return (true, Self::from_root(old, self.config.clone()));
        }

        let detached = self.mutate("prune", |root| self.detach(root, &prefix));
        let Some((subtree, cascade)) = detached else {
            debug!(prefix = %prefix, "nothing to prune");
            return (false, Self::with_config(self.config.clone()));
        };
        if let Some(len) = cascade {
            self.tidy_upwards(&prefix[..len]);
        }
        debug!(prefix = %prefix, "pruned subtree");

        let mut map = BTreeMap::new();
        adopt(&mut map, subtree);
        let root = TrieNode::new("", None, map);
        (true, Self::from_root(root, self.config.clone()))
    }

    /// Unlinks the node at `prefix` from its parent in one step under the
    /// parent's write lock. The detached node comes back relabelled with the
    /// full prefix.
    #[allow(clippy::type_complexity)]
    fn detach(
        &self,
        root: &NodeRef<V>,
        prefix: &str,
    ) -> Result<Option<(NodeRef<V>, Option<usize>)>, Retired> {
        let descent = self.descend(root, prefix)?;
        if !descent.is_exact(prefix) {
            return Ok(None);
        }
        Self::detach_at(&descent.path, prefix)
    }

    /// Detaches the last node of `path`. Any change to the parent's mapping
    /// since the walk restarts it; a removal or prune that got there first
    /// then shows up as a missing prefix.
    #[allow(clippy::type_complexity)]
    fn detach_at(
        path: &[NodeRef<V>],
        prefix: &str,
    ) -> Result<Option<(NodeRef<V>, Option<usize>)>, Retired> {
        let [.., parent, node] = path else {
            return Ok(None);
        };
        let Some(c) = node.first_char() else {
            return Ok(None);
        };

        let mut parent_guard = parent.children.write();
        if !maps_to(parent_guard.live()?, node) {
            return Err(Retired);
        }
        let mut node_guard = node.children.write();
        if node_guard.retired {
            return Err(Retired);
        }

        let subtree = node.relocate(&mut node_guard, prefix);
        parent_guard.map.remove(&c);

        let parent_is_root = path.len() < 3;
        let cascade = !parent_is_root && parent.value.is_vacant() && parent_guard.map.len() < 2;
        Ok(Some((subtree, cascade.then(|| prefix.len() - node.label.len()))))
    }

    /// Removes every entry by swapping in a fresh root.
    ///
    /// Iterators created before the call keep walking the old nodes, which are
    /// freed once the last of them is dropped.
    pub fn clear(&self) {
        self.root.store(TrieNode::root());
        debug!("cleared");
    }

    /// Returns an iterator over all entries.
    ///
    /// # Examples
    ///
    /// ```
    /// # use radixmap::RadixMap;
    /// let map = RadixMap::new();
    /// map.insert("b", 2).unwrap();
    /// map.insert("a", 1).unwrap();
    ///
    /// for (key, value) in map.iter() {
    ///     println!("{key}: {value}");
    /// }
    /// ```
    pub fn iter(&self) -> Iter<V> {
        self.search("")
    }

    pub fn keys(&self) -> Keys<V> {
        self.search_keys("")
    }

    pub fn values(&self) -> Values<V> {
        self.search_values("")
    }

    /// Counts the entries by walking the tree.
    ///
    /// Under concurrent mutation the count reflects each subtree at the moment
    /// it was visited.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        let root = self.root.load();
        root.value.is_vacant() && root.children.read().map.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn root_node(&self) -> NodeRef<V> {
        self.root.load_full()
    }
}
