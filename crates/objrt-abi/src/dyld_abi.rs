//! C loader API over the loader shim.
//!
//! A "header" on this side of the boundary is the runtime address of an
//! image's ELF header, which is also the image's identity in the registry.

use std::ffi::{CStr, c_char, c_int, c_uint, c_void};
use std::ptr;

use objrt_core::{HeaderInfo, ImageState};

use crate::runtime_state::runtime;

pub const DYLD_IMAGE_STATE_BOUND: c_int = 0;
pub const DYLD_IMAGE_STATE_DEPENDENTS_INITIALIZED: c_int = 1;

/// `struct dyld_image_info`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DyldImageInfo {
    pub image_load_address: *const c_void,
}

/// Returns NULL to accept the images, or a reason string to reject them.
pub type DyldImageStateChangeHandler = unsafe extern "C" fn(
    state: c_int,
    info_count: u32,
    info: *const DyldImageInfo,
) -> *const c_char;

/// `(header, slide)` callback for image add/remove.
pub type DyldImageCallback = unsafe extern "C" fn(mh: *const c_void, vmaddr_slide: isize);

fn image_state(state: c_int) -> Option<ImageState> {
    match state {
        DYLD_IMAGE_STATE_BOUND => Some(ImageState::Bound),
        DYLD_IMAGE_STATE_DEPENDENTS_INITIALIZED => Some(ImageState::DependentsInitialized),
        _ => None,
    }
}

const fn state_code(state: ImageState) -> c_int {
    match state {
        ImageState::Bound => DYLD_IMAGE_STATE_BOUND,
        ImageState::DependentsInitialized => DYLD_IMAGE_STATE_DEPENDENTS_INITIALIZED,
    }
}

/// Address and size of `segname,sectname` in the image at `mhp`, or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn getsectdatafromheader(
    mhp: *const c_void,
    segname: *const c_char,
    sectname: *const c_char,
    size: *mut u32,
) -> *mut c_char {
    if mhp.is_null() || segname.is_null() || sectname.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: non-null names from C callers are NUL-terminated.
    let (seg, sect) = unsafe { (CStr::from_ptr(segname), CStr::from_ptr(sectname)) };
    let (Ok(seg), Ok(sect)) = (seg.to_str(), sect.to_str()) else {
        return ptr::null_mut();
    };
    let Some(section) = runtime().loader().section_data(mhp as usize, seg, sect) else {
        return ptr::null_mut();
    };
    if !size.is_null() {
        // SAFETY: caller-provided out parameter.
        unsafe { *size = u32::try_from(section.size).unwrap_or(u32::MAX) };
    }
    section.addr as *mut c_char
}

/// Path of the registered image containing `addr`, or NULL. The string
/// stays valid while that image is registered.
#[unsafe(no_mangle)]
pub extern "C" fn dyld_image_path_containing_address(addr: *const c_void) -> *const c_char {
    let addr = addr as usize;
    runtime()
        .registry()
        .find_map(|hi| hi.mhdr.contains(addr).then(|| hi.mhdr.path_c().as_ptr()))
        .unwrap_or(ptr::null())
}

#[unsafe(no_mangle)]
pub extern "C" fn _dyld_register_func_for_add_image(func: Option<DyldImageCallback>) {
    let Some(func) = func else { return };
    runtime().loader().register_add_image(move |mh, slide| {
        // SAFETY: the callback was registered by C code for exactly this call.
        unsafe { func(mh.addr() as *const c_void, slide) }
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn _dyld_register_func_for_remove_image(func: Option<DyldImageCallback>) {
    let Some(func) = func else { return };
    runtime().loader().register_remove_image(move |mh, slide| {
        // SAFETY: as above.
        unsafe { func(mh.addr() as *const c_void, slide) }
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn dyld_register_image_state_change_handler(
    state: c_int,
    batch: bool,
    handler: Option<DyldImageStateChangeHandler>,
) {
    let (Some(state), Some(handler)) = (image_state(state), handler) else {
        log::warn!("objrt: ignoring state-change handler for state {state}");
        return;
    };
    runtime()
        .loader()
        .register_state_change_handler(state, batch, move |state, images| {
            call_state_handler(handler, state, images)
        });
}

fn call_state_handler(
    handler: DyldImageStateChangeHandler,
    state: ImageState,
    images: &[HeaderInfo],
) -> Option<String> {
    let infos: Vec<DyldImageInfo> = images
        .iter()
        .map(|hi| DyldImageInfo {
            image_load_address: hi.addr() as *const c_void,
        })
        .collect();
    let count = u32::try_from(infos.len()).unwrap_or(u32::MAX);
    // SAFETY: `infos` outlives the call and holds `count` entries.
    let reason = unsafe { handler(state_code(state), count, infos.as_ptr()) };
    if reason.is_null() {
        return None;
    }
    // SAFETY: a non-null result is a NUL-terminated message.
    Some(unsafe { CStr::from_ptr(reason) }.to_string_lossy().into_owned())
}

/// Number of registered images.
#[unsafe(no_mangle)]
pub extern "C" fn _objc_header_count() -> c_uint {
    c_uint::try_from(runtime().loader().header_count()).unwrap_or(c_uint::MAX)
}

/// Path of the registered image whose header is at `mh`, or NULL.
#[unsafe(no_mangle)]
pub extern "C" fn _objc_name_for_header(mh: *const c_void) -> *const c_char {
    let mh = mh as usize;
    runtime()
        .registry()
        .find_map(|hi| (hi.addr() == mh).then(|| hi.mhdr.path_c().as_ptr()))
        .unwrap_or(ptr::null())
}

/// `dlopen`, then register whatever it brought in.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn objrt_dlopen(filename: *const c_char, flags: c_int) -> *mut c_void {
    // SAFETY: arguments are passed through unchanged.
    let handle = unsafe { libc::dlopen(filename, flags) };
    if !handle.is_null() {
        resync();
    }
    handle
}

/// `dlclose`, then unregister whatever went away.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn objrt_dlclose(handle: *mut c_void) -> c_int {
    // SAFETY: as above.
    let rc = unsafe { libc::dlclose(handle) };
    if rc == 0 {
        resync();
    }
    rc
}

fn resync() {
    if let Err(err) = crate::host::sync_host_images(runtime()) {
        log::warn!("objrt: {err}");
    }
}

/// Handle of the loaded object named exactly `name`, or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn objrt_find_so(name: *const c_char) -> *mut c_void {
    if name.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: non-null names from C callers are NUL-terminated.
    let name = unsafe { CStr::from_ptr(name) };
    let limit = runtime().config().so_walk_limit;
    crate::link_map::find_so(name.to_bytes(), limit)
        .map_or(ptr::null_mut(), |node| node.as_ptr().cast())
}
