use std::collections::HashMap;

use objrt_core::solist::{MAX_SO_WALK, SharedObjectList, WalkEnd, find_by_name, names, search};

/// Nodes addressed by fake pointers, the way a loader's list is.
struct FakeLoader {
    head: Option<u64>,
    nodes: HashMap<u64, (Option<&'static str>, Option<u64>)>,
}

impl FakeLoader {
    fn new(entries: &[(u64, Option<&'static str>)]) -> Self {
        let nodes = entries
            .iter()
            .enumerate()
            .map(|(i, &(addr, name))| (addr, (name, entries.get(i + 1).map(|e| e.0))))
            .collect();
        Self {
            head: entries.first().map(|e| e.0),
            nodes,
        }
    }
}

impl SharedObjectList for FakeLoader {
    type Node = u64;

    fn head(&self) -> Option<u64> {
        self.head
    }

    fn next(&self, node: u64) -> Option<u64> {
        self.nodes.get(&node).and_then(|n| n.1)
    }

    fn name(&self, node: u64) -> Option<&[u8]> {
        self.nodes.get(&node).and_then(|n| n.0).map(str::as_bytes)
    }
}

#[test]
fn finds_named_object_on_the_list() {
    let list = FakeLoader::new(&[
        (0x7000, Some("")),
        (0x7100, Some("libc.so.6")),
        (0x7200, Some("libobjc.so.4")),
    ]);
    assert_eq!(find_by_name(&list, b"libobjc.so.4", MAX_SO_WALK), Some(0x7200));
    assert_eq!(find_by_name(&list, b"libc.so.6", MAX_SO_WALK), Some(0x7100));
}

#[test]
fn unreadable_names_are_skipped() {
    let list = FakeLoader::new(&[(0x10, None), (0x20, Some("libm.so.6"))]);
    let result = search(&list, b"libm.so.6", MAX_SO_WALK);
    assert_eq!(result.found, Some(0x20));
    assert_eq!(result.visited, 2);
    assert_eq!(names(&list, MAX_SO_WALK), [b"".to_vec(), b"libm.so.6".to_vec()]);
}

#[test]
fn miss_visits_each_node_once() {
    let list = FakeLoader::new(&[(1, Some("A")), (2, Some("B")), (3, Some("C"))]);
    let result = search(&list, b"D", MAX_SO_WALK);
    assert_eq!(result.found, None);
    assert!(result.visited <= 3);
    assert_eq!(result.end, Some(WalkEnd::Exhausted));
}

#[test]
fn self_loop_terminates() {
    let mut list = FakeLoader::new(&[(1, Some("A"))]);
    list.nodes.insert(1, (Some("A"), Some(1)));
    let result = search(&list, b"B", MAX_SO_WALK);
    assert_eq!(result.end, Some(WalkEnd::Cycle));
    assert_eq!(result.visited, 1);
}
