//! Shared-object lookup.
//!
//! The host loader keeps its loaded objects on a private linked list. This
//! module only knows that list through [`SharedObjectList`], so the layout
//! dependency stays in the implementation (the native one lives in
//! `objrt-abi`).
//!
//! Walks are bounded. A list that is longer than the bound, or that loops
//! because the assumed layout is wrong, ends the search with "not found"
//! rather than hanging.

use std::collections::HashSet;
use std::hash::Hash;

pub use crate::config::DEFAULT_SO_WALK_LIMIT as MAX_SO_WALK;

/// A loader's list of loaded shared objects.
pub trait SharedObjectList {
    /// Opaque node handle.
    type Node: Copy + Eq + Hash;

    /// First node, if the list can be located.
    fn head(&self) -> Option<Self::Node>;

    /// Successor of `node`.
    fn next(&self, node: Self::Node) -> Option<Self::Node>;

    /// Recorded name of `node` (path or soname), if readable.
    fn name(&self, node: Self::Node) -> Option<&[u8]>;
}

/// Why a walk ended without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// Reached the end of the list.
    Exhausted,
    /// Visited `limit` nodes.
    LimitReached,
    /// Came back to a node already visited.
    Cycle,
    /// The list head could not be located.
    NoHead,
}

/// Result of a bounded name search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Search<N> {
    pub found: Option<N>,
    pub visited: usize,
    pub end: Option<WalkEnd>,
}

/// Find the first node whose recorded name equals `name`, visiting at most
/// `limit` nodes.
pub fn find_by_name<L: SharedObjectList>(list: &L, name: &[u8], limit: usize) -> Option<L::Node> {
    search(list, name, limit).found
}

/// [`find_by_name`] with walk diagnostics.
pub fn search<L: SharedObjectList>(list: &L, name: &[u8], limit: usize) -> Search<L::Node> {
    let Some(mut node) = list.head() else {
        return Search {
            found: None,
            visited: 0,
            end: Some(WalkEnd::NoHead),
        };
    };
    let mut seen = HashSet::new();
    let mut visited = 0;
    loop {
        if visited == limit {
            log::warn!("objrt: shared-object walk stopped after {limit} nodes");
            return Search {
                found: None,
                visited,
                end: Some(WalkEnd::LimitReached),
            };
        }
        if !seen.insert(node) {
            log::warn!("objrt: shared-object list loops after {visited} nodes");
            return Search {
                found: None,
                visited,
                end: Some(WalkEnd::Cycle),
            };
        }
        visited += 1;
        if list.name(node) == Some(name) {
            return Search {
                found: Some(node),
                visited,
                end: None,
            };
        }
        match list.next(node) {
            Some(next) => node = next,
            None => {
                return Search {
                    found: None,
                    visited,
                    end: Some(WalkEnd::Exhausted),
                };
            }
        }
    }
}

/// Every readable name on the list, in order, up to `limit` nodes.
pub fn names<L: SharedObjectList>(list: &L, limit: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = list.head();
    while let Some(node) = cursor {
        if out.len() == limit || !seen.insert(node) {
            break;
        }
        out.push(list.name(node).map(<[u8]>::to_vec).unwrap_or_default());
        cursor = list.next(node);
    }
    out
}
