#![cfg(target_os = "linux")]

use std::ffi::{CStr, CString};

use objrt_abi::dyld_abi::objrt_find_so;
use objrt_abi::link_map::{get_anchor, loaded_names, find_so};
use objrt_abi::{host_objects, sync_host_images};
use objrt_core::Runtime;
use objrt_core::solist::MAX_SO_WALK;

#[test]
fn host_objects_point_at_elf_headers() {
    let objects = host_objects();
    assert!(!objects.is_empty());
    let main = objects
        .iter()
        .find(|o| o.is_main_executable())
        .expect("main executable is reported");
    assert!(main.mapped.contains(&main.header));
    assert!(objects.iter().any(|o| o.name.contains("libc.so")));

    for object in &objects {
        // SAFETY: `header` is the start of a mapped PT_LOAD with offset 0.
        let magic = unsafe { std::slice::from_raw_parts(object.header as *const u8, 4) };
        assert_eq!(magic, b"\x7fELF", "{}", object.name);
    }
}

#[test]
fn sync_records_every_readable_object_once() {
    let rt = Runtime::default();
    let first = sync_host_images(&rt).expect("first pass");
    assert!(first.mapped + first.ignored > 0);
    let main = host_objects()
        .into_iter()
        .find(|o| o.is_main_executable())
        .expect("main executable");
    assert!(rt.loader().is_known(main.header));

    let second = sync_host_images(&rt).expect("second pass");
    assert_eq!(second.mapped, 0);
    assert_eq!(second.ignored, 0);
    assert_eq!(second.unmapped, 0);
}

#[test]
fn main_executable_is_described_from_its_file() {
    let main = host_objects()
        .into_iter()
        .find(|o| o.is_main_executable())
        .expect("main executable");
    let image = main.describe().expect("readable");
    assert_eq!(image.addr(), main.header);
    assert_eq!(image.mapped(), main.mapped);
    assert!(!image.path().is_empty());
}

#[test]
fn anchor_is_opened_once() {
    let first = get_anchor().expect("libc is loaded");
    let second = get_anchor().expect("libc is loaded");
    assert_eq!(first, second);
}

#[test]
fn loaded_objects_can_be_found_by_exact_name() {
    let names = loaded_names(MAX_SO_WALK);
    let libc = names
        .iter()
        .find(|n| n.ends_with("libc.so.6"))
        .expect("libc on the list");

    let node = find_so(libc.as_bytes(), MAX_SO_WALK).expect("found");
    // SAFETY: a node returned by the walk is a live link map.
    let recorded = unsafe { CStr::from_ptr(node.as_ref().l_name) };
    assert_eq!(recorded.to_bytes(), libc.as_bytes());

    assert!(find_so(b"libdefinitely-not-loaded.so.9", MAX_SO_WALK).is_none());

    let c_name = CString::new(libc.as_str()).expect("no interior NUL");
    // SAFETY: NUL-terminated name.
    let handle = unsafe { objrt_find_so(c_name.as_ptr()) };
    assert_eq!(handle, node.as_ptr().cast());
}
