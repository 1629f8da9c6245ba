#![cfg(target_os = "linux")]

use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use objrt_abi::dyld_abi::{
    _dyld_register_func_for_add_image, _dyld_register_func_for_remove_image, _objc_header_count,
    _objc_name_for_header, DYLD_IMAGE_STATE_BOUND, DyldImageInfo,
    dyld_image_path_containing_address, dyld_register_image_state_change_handler,
    getsectdatafromheader,
};
use objrt_abi::runtime;
use objrt_core::elf::fixture::{ElfFixture, FixtureSection};
use objrt_core::{ImageHeader, ImageKind, LoaderError};

static TEST_LOCK: Mutex<()> = Mutex::new(());

static BOUND_CALLS: AtomicUsize = AtomicUsize::new(0);
static LAST_ADDED: AtomicUsize = AtomicUsize::new(0);
static LAST_REMOVED: AtomicUsize = AtomicUsize::new(0);

const MODULES: &str = "SEG_DATA,SECT_OBJC_MODULES";

unsafe extern "C" fn count_bound(
    _state: c_int,
    _count: u32,
    _info: *const DyldImageInfo,
) -> *const c_char {
    BOUND_CALLS.fetch_add(1, Ordering::SeqCst);
    ptr::null()
}

unsafe extern "C" fn refuse_marked(
    _state: c_int,
    count: u32,
    info: *const DyldImageInfo,
) -> *const c_char {
    // SAFETY: the shim passes `count` entries.
    let infos = unsafe { std::slice::from_raw_parts(info, count as usize) };
    for entry in infos {
        let name = _objc_name_for_header(entry.image_load_address);
        // SAFETY: registered images have NUL-terminated paths.
        if !name.is_null() && unsafe { CStr::from_ptr(name) }.to_bytes() == b"refuse-me" {
            return c"marked for refusal".as_ptr();
        }
    }
    ptr::null()
}

unsafe extern "C" fn record_added(mh: *const c_void, _slide: isize) {
    LAST_ADDED.store(mh as usize, Ordering::SeqCst);
}

unsafe extern "C" fn record_removed(mh: *const c_void, _slide: isize) {
    LAST_REMOVED.store(mh as usize, Ordering::SeqCst);
}

/// An image whose "mapping" is the fixture buffer itself.
fn buffer_image(elf: &[u8], path: &str) -> ImageHeader {
    let parsed = objrt_core::elf::ElfFile::parse(elf).expect("fixture parses");
    let sh = parsed.section_by_name(MODULES).expect("modules").header;
    let base = elf.as_ptr() as usize;
    let slide = (base + sh.sh_offset as usize) as isize - sh.sh_addr as isize;
    ImageHeader::from_elf(elf, base, slide, path, ImageKind::Bundle)
        .expect("fixture parses")
        .with_mapped(base..base + elf.len())
}

fn fixture(bytes: &[u8]) -> Vec<u8> {
    ElfFixture::new()
        .load(0, 0x1000)
        .section(FixtureSection::data(MODULES, 0x400, bytes))
        .build()
}

#[test]
fn getsectdatafromheader_returns_recorded_bytes() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let payload: Vec<u8> = (0..96u8).map(|b| b ^ 0x5a).collect();
    let elf = fixture(&payload);
    let image = buffer_image(&elf, "/tmp/libsections.so");
    let mh = image.addr();
    runtime().loader().map_image(image).expect("maps");

    let mut size = 0u32;
    // SAFETY: valid header and NUL-terminated names.
    let data = unsafe {
        getsectdatafromheader(
            mh as *const c_void,
            c"SEG_DATA".as_ptr(),
            c"SECT_OBJC_MODULES".as_ptr(),
            &mut size,
        )
    };
    assert!(!data.is_null());
    assert_eq!(size as usize, payload.len());
    // SAFETY: the section lies inside `elf`, which is still alive.
    let found = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) };
    assert_eq!(found, payload.as_slice());

    // SAFETY: as above.
    let missing = unsafe {
        getsectdatafromheader(
            mh as *const c_void,
            c"SEG_DATA".as_ptr(),
            c"__nope".as_ptr(),
            &mut size,
        )
    };
    assert!(missing.is_null());
    // SAFETY: null arguments are rejected before use.
    let null =
        unsafe { getsectdatafromheader(ptr::null(), ptr::null(), ptr::null(), ptr::null_mut()) };
    assert!(null.is_null());

    runtime().loader().unmap_image(mh);
}

#[test]
fn name_and_containment_lookups() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let elf = fixture(&[1; 32]);
    let image = buffer_image(&elf, "/tmp/libnamed.so");
    let mh = image.addr();
    let before = _objc_header_count();
    runtime().loader().map_image(image).expect("maps");
    assert_eq!(_objc_header_count(), before + 1);

    let name = _objc_name_for_header(mh as *const c_void);
    assert!(!name.is_null());
    // SAFETY: registered image path.
    assert_eq!(unsafe { CStr::from_ptr(name) }, c"/tmp/libnamed.so");

    let inside = dyld_image_path_containing_address((mh + 8) as *const c_void);
    assert_eq!(inside, name);
    assert!(dyld_image_path_containing_address(ptr::null()).is_null());

    runtime().loader().unmap_image(mh);
    assert!(_objc_name_for_header(mh as *const c_void).is_null());
    assert_eq!(_objc_header_count(), before);
}

#[test]
fn registered_callbacks_see_mapped_images() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    dyld_register_image_state_change_handler(DYLD_IMAGE_STATE_BOUND, true, Some(count_bound));
    _dyld_register_func_for_add_image(Some(record_added));
    _dyld_register_func_for_remove_image(Some(record_removed));

    let elf = fixture(&[2; 32]);
    let image = buffer_image(&elf, "/tmp/libcallbacks.so");
    let mh = image.addr();
    let calls = BOUND_CALLS.load(Ordering::SeqCst);
    runtime().loader().map_image(image).expect("maps");
    assert_eq!(BOUND_CALLS.load(Ordering::SeqCst), calls + 1);
    assert_eq!(LAST_ADDED.load(Ordering::SeqCst), mh);

    runtime().loader().unmap_image(mh);
    assert_eq!(LAST_REMOVED.load(Ordering::SeqCst), mh);
}

#[test]
fn handler_can_refuse_an_image() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    dyld_register_image_state_change_handler(DYLD_IMAGE_STATE_BOUND, false, Some(refuse_marked));

    let elf = fixture(&[3; 32]);
    let image = buffer_image(&elf, "refuse-me");
    let mh = image.addr();
    let before = _objc_header_count();
    let err = runtime().loader().map_image(image).expect_err("refused");
    assert!(matches!(
        err,
        LoaderError::Rejected { ref reason, .. } if reason == "marked for refusal"
    ));
    assert_eq!(_objc_header_count(), before);
    assert!(_objc_name_for_header(mh as *const c_void).is_null());
}

#[test]
fn unknown_state_is_ignored() {
    dyld_register_image_state_change_handler(42, true, Some(count_bound));
    dyld_register_image_state_change_handler(DYLD_IMAGE_STATE_BOUND, true, None);
}
