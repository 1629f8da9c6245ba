//! Loader compatibility shim.
//!
//! Re-implements the image-state notification and section lookup API on top
//! of whatever tells us that images came and went. The host side (see the
//! `objrt-abi` crate) enumerates ELF objects and calls [`LoaderShim::map_images`]
//! and [`LoaderShim::unmap_image`]; this module turns those calls into
//! registry updates and handler batches.
//!
//! Ordering for a mapped batch:
//! 1. new descriptors are appended to the registry;
//! 2. `Bound` handlers run (a rejection removes the image again);
//! 3. add-image callbacks run for the surviving images;
//! 4. `DependentsInitialized` handlers run.
//!
//! The whole sequence holds the shim's recursive load lock, so handlers see
//! the registry as it was after step 1 and may themselves load images.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::OsConfig;
use crate::debugger::DebuggerGate;
use crate::error::LoaderError;
use crate::image::{HeaderInfo, ImageHeader, SectionRef};
use crate::lock::RecursiveMutex;
use crate::registry::HeaderRegistry;

/// Image states handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageState {
    /// The image is mapped and its symbols bound.
    Bound,
    /// The image's dependencies ran their initializers.
    DependentsInitialized,
}

impl ImageState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bound => "bound",
            Self::DependentsInitialized => "dependents-initialized",
        }
    }
}

/// State-change handler. Returning `Some(reason)` from a `Bound` handler
/// rejects the images it was given.
pub type StateHandler = Arc<dyn Fn(ImageState, &[HeaderInfo]) -> Option<String> + Send + Sync>;

/// Add/remove image callback: `(header, slide)`.
pub type ImageCallback = Arc<dyn Fn(&ImageHeader, isize) + Send + Sync>;

/// Result of mapping one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    /// Registered and announced.
    Mapped,
    /// Already known; nothing happened.
    AlreadyMapped,
    /// Carries no runtime metadata; remembered but not registered.
    NoMetadata,
}

#[derive(Clone)]
struct StateRegistration {
    state: ImageState,
    batch: bool,
    handler: StateHandler,
}

#[derive(Default)]
struct Handlers {
    state: Vec<StateRegistration>,
    add: Vec<ImageCallback>,
    remove: Vec<ImageCallback>,
}

/// Translates host loader events into registry updates and notifications.
pub struct LoaderShim {
    registry: Arc<HeaderRegistry>,
    handlers: RwLock<Handlers>,
    // Image address -> registered.
    known: Mutex<HashMap<usize, bool>>,
    load_lock: RecursiveMutex,
    config: OsConfig,
}

impl LoaderShim {
    pub const LOAD_LOCK_NAME: &'static str = "imageLoadLock";

    pub fn new(registry: Arc<HeaderRegistry>, gate: Arc<DebuggerGate>) -> Self {
        let config = *gate.config();
        Self {
            registry,
            handlers: RwLock::new(Handlers::default()),
            known: Mutex::new(HashMap::new()),
            load_lock: RecursiveMutex::new(Self::LOAD_LOCK_NAME, gate),
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HeaderRegistry> {
        &self.registry
    }

    /// Subscribe to `state`. Batch handlers get every image of a batch in one
    /// call; the others get one call per image. The handler is called right
    /// away for the images already registered.
    pub fn register_state_change_handler<F>(&self, state: ImageState, batch: bool, handler: F)
    where
        F: Fn(ImageState, &[HeaderInfo]) -> Option<String> + Send + Sync + 'static,
    {
        let registration = StateRegistration {
            state,
            batch,
            handler: Arc::new(handler),
        };
        self.handlers.write().state.push(registration.clone());

        self.with_load_lock(|| {
            let existing = self.registry.snapshot();
            if existing.is_empty() {
                return;
            }
            for rejected in invoke(&registration, &existing) {
                log::warn!(
                    "objrt: handler rejected already-loaded image {} ({})",
                    rejected.path,
                    rejected.reason
                );
            }
        });
    }

    /// Call `f` for every image mapped from now on, and right away for every
    /// image already registered.
    pub fn register_add_image<F>(&self, f: F)
    where
        F: Fn(&ImageHeader, isize) + Send + Sync + 'static,
    {
        let callback: ImageCallback = Arc::new(f);
        self.handlers.write().add.push(Arc::clone(&callback));
        self.with_load_lock(|| {
            for hi in self.registry.snapshot() {
                callback(&hi.mhdr, hi.mhdr.slide());
            }
        });
    }

    /// Call `f` for every image before it is unmapped.
    pub fn register_remove_image<F>(&self, f: F)
    where
        F: Fn(&ImageHeader, isize) + Send + Sync + 'static,
    {
        self.handlers.write().remove.push(Arc::new(f));
    }

    /// Map one image.
    pub fn map_image(&self, image: ImageHeader) -> Result<MapOutcome, LoaderError> {
        self.map_images(vec![image])
            .map(|outcomes| outcomes.into_iter().next().unwrap_or(MapOutcome::AlreadyMapped))
    }

    /// Map a batch of images and notify the handlers.
    ///
    /// If a `Bound` handler rejects an image, that image is unregistered, the
    /// rest of the batch proceeds, and the first rejection is returned.
    pub fn map_images(&self, images: Vec<ImageHeader>) -> Result<Vec<MapOutcome>, LoaderError> {
        self.with_load_lock(|| self.map_images_locked(images))
    }

    fn map_images_locked(&self, images: Vec<ImageHeader>) -> Result<Vec<MapOutcome>, LoaderError> {
        let mut outcomes = Vec::with_capacity(images.len());
        let mut batch = Vec::new();
        for image in images {
            let addr = image.addr();
            let previously = self.known.lock().get(&addr).copied();
            let outcome = match previously {
                Some(true) => MapOutcome::AlreadyMapped,
                Some(false) => MapOutcome::NoMetadata,
                None if !image.has_runtime_metadata() => {
                    self.known.lock().insert(addr, false);
                    log::debug!("objrt: ignoring {} (no runtime metadata)", image.path());
                    MapOutcome::NoMetadata
                }
                None => {
                    let hi = HeaderInfo::new(Arc::new(image));
                    if self.config.print_images {
                        log::info!(
                            "objrt: IMAGES: loading image for {}{}",
                            hi.name(),
                            if hi.is_bundle() { " (bundle)" } else { "" }
                        );
                    }
                    self.known.lock().insert(addr, true);
                    self.registry.append(hi.clone());
                    batch.push(hi);
                    MapOutcome::Mapped
                }
            };
            outcomes.push(outcome);
        }
        if batch.is_empty() {
            return Ok(outcomes);
        }

        let mut first_rejection = None;
        for registration in self.state_handlers(ImageState::Bound) {
            let live: Vec<HeaderInfo> = batch
                .iter()
                .filter(|hi| self.registry.contains(hi.addr()))
                .cloned()
                .collect();
            if live.is_empty() {
                break;
            }
            for Rejection { addr, path, reason } in invoke(&registration, &live) {
                log::warn!("objrt: image {path} rejected: {reason}");
                self.registry.remove(addr);
                self.known.lock().insert(addr, false);
                first_rejection.get_or_insert(LoaderError::Rejected { path, reason });
            }
        }

        batch.retain(|hi| self.registry.contains(hi.addr()));
        let add = self.handlers.read().add.clone();
        for hi in &batch {
            for callback in &add {
                callback(&hi.mhdr, hi.mhdr.slide());
            }
        }
        if !batch.is_empty() {
            for registration in self.state_handlers(ImageState::DependentsInitialized) {
                for Rejection { path, reason, .. } in invoke(&registration, &batch) {
                    log::warn!("objrt: ignoring late rejection of {path}: {reason}");
                }
            }
        }

        match first_rejection {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }

    /// Forget the image whose header is at `addr`. Remove callbacks run
    /// before the descriptor leaves the registry.
    pub fn unmap_image(&self, addr: usize) -> Option<HeaderInfo> {
        self.with_load_lock(|| {
            let registered = self.known.lock().remove(&addr)?;
            if !registered {
                return None;
            }
            let hi = self.registry.find(addr)?;
            let remove = self.handlers.read().remove.clone();
            for callback in &remove {
                callback(&hi.mhdr, hi.mhdr.slide());
            }
            if self.config.print_images {
                log::info!("objrt: IMAGES: unloading image for {}", hi.name());
            }
            self.registry.remove(addr)
        })
    }

    /// Addresses of every image seen so far, registered or not.
    #[must_use]
    pub fn known_images(&self) -> Vec<usize> {
        self.known.lock().keys().copied().collect()
    }

    #[must_use]
    pub fn is_known(&self, addr: usize) -> bool {
        self.known.lock().contains_key(&addr)
    }

    /// Runtime address and size of `segname,sectname` in the registered image
    /// whose header is at `mh`.
    #[must_use]
    pub fn section_data(&self, mh: usize, segname: &str, sectname: &str) -> Option<SectionRef> {
        self.registry
            .find_map(|hi| (hi.addr() == mh).then(|| hi.mhdr.section_data(segname, sectname)))
            .flatten()
    }

    /// Path of the registered image whose mapped range contains `addr`.
    #[must_use]
    pub fn image_path_containing_address(&self, addr: usize) -> Option<String> {
        self.registry.path_containing(addr)
    }

    /// Path of the registered image whose header is at `mh`.
    #[must_use]
    pub fn name_for_header(&self, mh: usize) -> Option<String> {
        self.registry
            .find_map(|hi| (hi.addr() == mh).then(|| hi.name().to_string()))
    }

    #[must_use]
    pub fn header_count(&self) -> usize {
        self.registry.count()
    }

    fn state_handlers(&self, state: ImageState) -> Vec<StateRegistration> {
        self.handlers
            .read()
            .state
            .iter()
            .filter(|r| r.state == state)
            .cloned()
            .collect()
    }

    fn with_load_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        self.load_lock.lock();
        let result = f();
        if let Err(err) = self.load_lock.unlock() {
            log::debug!("objrt: {err}");
        }
        result
    }
}

/// One image a handler refused. Images are identified by header address;
/// paths need not be unique.
struct Rejection {
    addr: usize,
    path: String,
    reason: String,
}

impl Rejection {
    fn new(hi: &HeaderInfo, reason: String) -> Self {
        Self {
            addr: hi.addr(),
            path: hi.name().to_string(),
            reason,
        }
    }
}

/// Run one handler over `images`.
fn invoke(registration: &StateRegistration, images: &[HeaderInfo]) -> Vec<Rejection> {
    let state = registration.state;
    if registration.batch {
        match (registration.handler)(state, images) {
            Some(reason) => images
                .iter()
                .map(|hi| Rejection::new(hi, reason.clone()))
                .collect(),
            None => Vec::new(),
        }
    } else {
        images
            .iter()
            .filter_map(|hi| {
                (registration.handler)(state, core::slice::from_ref(hi))
                    .map(|reason| Rejection::new(hi, reason))
            })
            .collect()
    }
}

impl core::fmt::Debug for LoaderShim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("LoaderShim")
            .field("state_handlers", &handlers.state.len())
            .field("add_callbacks", &handlers.add.len())
            .field("remove_callbacks", &handlers.remove.len())
            .field("known", &self.known.lock().len())
            .finish()
    }
}
