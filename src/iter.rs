use std::sync::Arc;

use crate::node::NodeRef;

/// A lazy pre-order iterator over the key-value pairs of a `RadixMap`.
///
/// This struct is created by the [`search`] and [`iter`] methods on
/// [`RadixMap`]. It owns the nodes it still has to visit and holds no lock
/// between calls to `next`, so it stays valid across concurrent mutation and
/// even after the map is cleared. Entries present for the whole walk are always
/// yielded, even when the nodes holding them are split or merged meanwhile.
///
/// [`search`]: crate::RadixMap::search
/// [`iter`]: crate::RadixMap::iter
/// [`RadixMap`]: crate::RadixMap
pub struct Iter<V> {
    stack: Vec<(String, NodeRef<V>)>,
}

impl<V> Iter<V> {
    pub(crate) fn new(key: String, node: NodeRef<V>) -> Self {
        Iter { stack: vec![(key, node)] }
    }

    pub(crate) fn empty() -> Self {
        Iter { stack: Vec::new() }
    }
}

impl<V> Iterator for Iter<V> {
    type Item = (String, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((key, node)) = self.stack.pop() {
            // A node retired after it was reached still holds the entries it
            // handed to its replacement, which this walk never visits.
            for child in node.snapshot().into_iter().rev() {
                let child_key = format!("{key}{}", child.label);
                self.stack.push((child_key, child));
            }
            if let Some(value) = node.value.peek() {
                return Some((key, value));
            }
        }
        None
    }
}

/// An iterator over the keys of a `RadixMap`.
///
/// This struct is created by the [`keys`] and [`search_keys`] methods on
/// `RadixMap`.
///
/// [`keys`]: crate::RadixMap::keys
/// [`search_keys`]: crate::RadixMap::search_keys
pub struct Keys<V> {
    pub(crate) inner: Iter<V>,
}

impl<V> Iterator for Keys<V> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }
}

/// An iterator over the values of a `RadixMap`.
///
/// This struct is created by the [`values`] and [`search_values`] methods on
/// `RadixMap`.
///
/// [`values`]: crate::RadixMap::values
/// [`search_values`]: crate::RadixMap::search_values
pub struct Values<V> {
    pub(crate) inner: Iter<V>,
}

impl<V> Iterator for Values<V> {
    type Item = Arc<V>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }
}
