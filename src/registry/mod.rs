//! The Binding Authority
//!
//! [`Registry`] is the single table mapping opaque client handles to render
//! contexts, window surfaces and color buffers. It owns all creation and
//! destruction, serializes every mutation under one process-wide lock, and
//! drives the binding protocol that multiplexes the driver's single
//! current-context state across calling threads.
//!
//! One registry exists per process; its lifetime is owned by the embedding
//! session manager and it is passed into every call site. There is no
//! hidden global.
//!
//! Handle-level operations follow a strict propagation policy: a bad handle
//! is never an error, it is a `0`/`false` return with no state change.
//! Fatal conditions exist only at construction time.

mod present;

pub use present::{PostCallback, PostedFrame};

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::colorbuffer::ColorBuffer;
use crate::config::{ApiSupport, ConfigId, RegistryCaps, SurfaceKind, choose_config};
use crate::context::{RenderContext, ShareGroup, ShareGroupTable};
use crate::decoder::{ApiVersion, DecoderState, DecoderTable};
use crate::driver::{CurrentGuard, GlDriver, NativeSurfaceId, PixelFormat, SubwindowHost};
use crate::errors::{MuxError, Result};
use crate::surface::{SurfaceBinding, WindowSurface};

use present::DisplayState;

/// Opaque client-visible object handle. `0` is the "no object" sentinel and
/// doubles as the failure return of the create operations.
pub type Handle = u32;

/// A color-buffer table entry: the buffer plus its client reference count.
struct ColorBufferRef {
    cb: Arc<ColorBuffer>,
    refcount: i32,
}

/// Per-thread binding record, mutated only by [`Registry::bind_context`].
#[derive(Default)]
struct ThreadBinding {
    context: Option<(Handle, Arc<RenderContext>)>,
    draw: Option<(Handle, Arc<WindowSurface>)>,
    read: Option<(Handle, Arc<WindowSurface>)>,
    decoder: Option<(ApiVersion, DecoderState)>,
}

/// State shared between the registry and the objects it hands out, so that
/// teardown can run wherever the last reference dies.
pub(crate) struct RegistryShared {
    pub(crate) driver: Arc<dyn GlDriver>,
    pub(crate) configs: Vec<crate::config::FbConfig>,
    fallback: Mutex<Option<NativeSurfaceId>>,
}

impl RegistryShared {
    /// The lazily created 1×1 off-screen surface used as a legal make-current
    /// target while deleting a dying context's share objects. Created once
    /// per registry, against a config compatible with the first dying
    /// context's API version.
    pub(crate) fn fallback_surface(&self, api: ApiVersion) -> Option<NativeSurfaceId> {
        let mut slot = self.fallback.lock();
        if let Some(surface) = *slot {
            return Some(surface);
        }
        let Some(config) = choose_config(
            &self.configs,
            ApiSupport::from_version(api),
            SurfaceKind::PBUFFER,
        ) else {
            log::error!("no config usable for the teardown fallback surface");
            return None;
        };
        match self.driver.create_pbuffer_surface(config, 1, 1) {
            Ok(surface) => {
                *slot = Some(surface);
                Some(surface)
            }
            Err(err) => {
                log::error!("unable to create the teardown fallback surface: {err}");
                None
            }
        }
    }
}

struct RegistryInner {
    next_handle: Handle,
    contexts: FxHashMap<Handle, Arc<RenderContext>>,
    surfaces: FxHashMap<Handle, Arc<WindowSurface>>,
    colorbuffers: FxHashMap<Handle, ColorBufferRef>,
    share_groups: ShareGroupTable,
    bindings: FxHashMap<ThreadId, ThreadBinding>,
    display: DisplayState,
}

impl RegistryInner {
    /// Issues the next free handle: scan forward from the persistent
    /// counter, skipping `0` and any value live in the context or surface
    /// table. Color buffers share the numbering space but are checked
    /// independently by their own table.
    fn gen_handle(&mut self) -> Handle {
        let mut id = self.next_handle;
        loop {
            id = id.wrapping_add(1);
            if id != 0 && !self.contexts.contains_key(&id) && !self.surfaces.contains_key(&id) {
                break;
            }
        }
        self.next_handle = id;
        id
    }
}

/// The host-side resource registry and binding authority.
pub struct Registry {
    shared: Arc<RegistryShared>,
    windowing: Arc<dyn SubwindowHost>,
    decoders: DecoderTable,
    caps: RegistryCaps,
    /// Guest framebuffer dimensions, fixed at initialization.
    width: u32,
    height: u32,
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Initializes the registry against a driver and window system.
    ///
    /// Fails when a required capability is missing, when no config is
    /// renderable with the legacy API, or when the display context pair
    /// cannot be created. These are the only fatal conditions in the crate.
    pub fn new(
        driver: Arc<dyn GlDriver>,
        windowing: Arc<dyn SubwindowHost>,
        decoders: DecoderTable,
        width: u32,
        height: u32,
        on_post: Option<PostCallback>,
    ) -> Result<Self> {
        let raw_caps = driver.capabilities();
        if !raw_caps.has_image_texture_binding {
            return Err(MuxError::MissingCapability("image-to-texture binding"));
        }

        let configs = driver.configs();
        let has_legacy = configs
            .iter()
            .any(|c| c.apis.contains(ApiSupport::LEGACY));
        if !has_legacy {
            return Err(MuxError::NoLegacyConfig);
        }
        let has_modern_configs = configs
            .iter()
            .any(|c| c.apis.contains(ApiSupport::MODERN));

        let caps = RegistryCaps {
            version: raw_caps.version,
            has_modern_api: raw_caps.has_modern_api && has_modern_configs,
            has_image_texture_binding: raw_caps.has_image_texture_binding,
            has_image_renderbuffer_binding: raw_caps.has_image_renderbuffer_binding,
        };

        let display_config = choose_config(
            &configs,
            ApiSupport::LEGACY,
            SurfaceKind::WINDOW | SurfaceKind::PBUFFER,
        )
        .ok_or(MuxError::NoLegacyConfig)?;

        // The display pair: a window context for subwindow output and a
        // pbuffer context shared with it, so overlay uploads never disturb
        // the window context's drawable binding.
        let window_context = driver.create_context(display_config, None, ApiVersion::Legacy)?;
        let pbuffer_context =
            driver.create_context(display_config, Some(window_context), ApiVersion::Legacy)?;
        let pbuffer_surface = driver.create_pbuffer_surface(display_config, 1, 1)?;

        {
            let _probe = CurrentGuard::acquire(
                driver.as_ref(),
                Some(pbuffer_surface),
                Some(pbuffer_surface),
                Some(pbuffer_context),
            )?;
            driver.set_view(width, height);
            driver.set_swap_interval(1);
        }

        let display = DisplayState::new(
            display_config,
            window_context,
            pbuffer_context,
            pbuffer_surface,
            width,
            height,
        );

        let registry = Self {
            shared: Arc::new(RegistryShared {
                driver,
                configs,
                fallback: Mutex::new(None),
            }),
            windowing,
            decoders,
            caps,
            width,
            height,
            inner: Mutex::new(RegistryInner {
                next_handle: 0,
                contexts: FxHashMap::default(),
                surfaces: FxHashMap::default(),
                colorbuffers: FxHashMap::default(),
                share_groups: ShareGroupTable::new(),
                bindings: FxHashMap::default(),
                display,
            }),
        };

        if on_post.is_some() && !registry.register_post_callback(on_post) {
            return Err(MuxError::MissingCapability("capture surface"));
        }

        Ok(registry)
    }

    #[must_use]
    pub fn caps(&self) -> RegistryCaps {
        self.caps
    }

    /// Guest framebuffer dimensions.
    #[must_use]
    pub fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    // ------------------------------------------------------------------
    // Creation / destruction
    // ------------------------------------------------------------------

    /// Creates a render context against `config`, optionally sharing objects
    /// with the context behind `share`. Returns `0` on unknown config,
    /// stale share handle, or native failure.
    pub fn create_render_context(
        &self,
        config: ConfigId,
        share: Handle,
        api: ApiVersion,
    ) -> Handle {
        let mut inner = self.inner.lock();

        let usable = self
            .shared
            .configs
            .iter()
            .any(|c| c.id == config && c.apis.contains(ApiSupport::from_version(api)));
        if !usable {
            log::debug!("create_render_context: config {config:?} not renderable with {api:?}");
            return 0;
        }

        let share_ctx = if share != 0 {
            match inner.contexts.get(&share) {
                Some(ctx) => Some(Arc::clone(ctx)),
                None => return 0,
            }
        } else {
            None
        };

        inner.share_groups.prune();
        let decoder = Arc::clone(self.decoders.get(api));
        match RenderContext::create(
            Arc::clone(&self.shared),
            decoder,
            &mut inner.share_groups,
            config,
            share_ctx.as_deref(),
            api,
        ) {
            Ok(ctx) => {
                let handle = inner.gen_handle();
                inner.contexts.insert(handle, ctx);
                handle
            }
            Err(err) => {
                log::error!("failed to create render context: {err}");
                0
            }
        }
    }

    /// Creates an off-screen window surface of fixed size. Returns `0` on
    /// unknown config or native failure.
    pub fn create_window_surface(&self, config: ConfigId, width: u32, height: u32) -> Handle {
        let mut inner = self.inner.lock();

        let usable = self
            .shared
            .configs
            .iter()
            .any(|c| c.id == config && c.surfaces.contains(SurfaceKind::PBUFFER));
        if !usable {
            log::debug!("create_window_surface: config {config:?} has no off-screen backing");
            return 0;
        }

        match WindowSurface::create(Arc::clone(&self.shared.driver), config, width, height) {
            Ok(surface) => {
                let handle = inner.gen_handle();
                inner.surfaces.insert(handle, Arc::new(surface));
                handle
            }
            Err(err) => {
                log::error!("failed to create window surface: {err}");
                0
            }
        }
    }

    /// Allocates a color buffer with an initial reference count of 1 (the
    /// creating client's implicit reference). Returns `0` on failure.
    pub fn create_color_buffer(&self, width: u32, height: u32, format: PixelFormat) -> Handle {
        let mut inner = self.inner.lock();
        match ColorBuffer::create(Arc::clone(&self.shared.driver), width, height, format) {
            Ok(cb) => {
                let handle = inner.gen_handle();
                inner.colorbuffers.insert(
                    handle,
                    ColorBufferRef {
                        cb: Arc::new(cb),
                        refcount: 1,
                    },
                );
                handle
            }
            Err(err) => {
                log::error!("failed to create color buffer: {err}");
                0
            }
        }
    }

    /// Removes the context from the table. The handle dies immediately; the
    /// native context is torn down once the last reference (a thread that
    /// still has it bound, possibly) lets go.
    pub fn destroy_render_context(&self, handle: Handle) {
        let mut inner = self.inner.lock();
        inner.contexts.remove(&handle);
    }

    pub fn destroy_window_surface(&self, handle: Handle) {
        let mut inner = self.inner.lock();
        inner.surfaces.remove(&handle);
    }

    /// Adds a client reference to a color buffer. A bad handle is silently
    /// ignored; this is documented protocol behavior, not error masking.
    pub fn open_color_buffer(&self, handle: Handle) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.colorbuffers.get_mut(&handle) {
            entry.refcount += 1;
        }
    }

    /// Drops a client reference; the buffer is destroyed exactly when the
    /// count reaches zero. A bad handle is silently ignored.
    pub fn close_color_buffer(&self, handle: Handle) {
        let mut inner = self.inner.lock();
        let gone = match inner.colorbuffers.get_mut(&handle) {
            Some(entry) => {
                entry.refcount -= 1;
                entry.refcount == 0
            }
            None => false,
        };
        if gone {
            inner.colorbuffers.remove(&handle);
        }
    }

    // ------------------------------------------------------------------
    // Data plane
    // ------------------------------------------------------------------

    /// Associates a color buffer with a window surface. Many surfaces may
    /// reference the same buffer.
    pub fn set_window_surface_color_buffer(&self, surface: Handle, colorbuffer: Handle) -> bool {
        let inner = self.inner.lock();
        let Some(win) = inner.surfaces.get(&surface) else {
            return false;
        };
        let Some(entry) = inner.colorbuffers.get(&colorbuffer) else {
            return false;
        };
        win.set_color_buffer(Arc::clone(&entry.cb));
        true
    }

    /// Copies a surface's rendered contents into its attached color buffer.
    pub fn flush_window_surface_color_buffer(&self, surface: Handle) -> bool {
        let inner = self.inner.lock();
        let Some(win) = inner.surfaces.get(&surface) else {
            return false;
        };
        if let Err(err) = win.flush_color_buffer() {
            log::warn!("flush of surface {surface} failed: {err}");
        }
        true
    }

    /// Sub-rectangle pixel upload into a color buffer. Fails only for an
    /// unknown handle.
    pub fn update_color_buffer(
        &self,
        handle: Handle,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
    ) -> bool {
        let inner = self.inner.lock();
        let Some(entry) = inner.colorbuffers.get(&handle) else {
            return false;
        };
        if let Err(err) = entry.cb.sub_update(x, y, width, height, format, pixels) {
            log::warn!("update of color buffer {handle} failed: {err}");
        }
        true
    }

    /// Attaches a color buffer as the texture target of whatever context is
    /// currently bound.
    pub fn bind_color_buffer_to_texture(&self, handle: Handle) -> bool {
        let inner = self.inner.lock();
        let Some(entry) = inner.colorbuffers.get(&handle) else {
            return false;
        };
        match entry.cb.bind_to_texture() {
            Ok(()) => true,
            Err(err) => {
                log::warn!("texture bind of color buffer {handle} failed: {err}");
                false
            }
        }
    }

    /// Attaches a color buffer as the renderbuffer target of whatever
    /// context is currently bound.
    pub fn bind_color_buffer_to_renderbuffer(&self, handle: Handle) -> bool {
        let inner = self.inner.lock();
        let Some(entry) = inner.colorbuffers.get(&handle) else {
            return false;
        };
        match entry.cb.bind_to_renderbuffer() {
            Ok(()) => true,
            Err(err) => {
                log::warn!("renderbuffer bind of color buffer {handle} failed: {err}");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Binding protocol
    // ------------------------------------------------------------------

    /// Binds a context and its draw/read surfaces for the calling thread.
    ///
    /// All three handles zero is a true unbind, valid only when the thread
    /// has a current context; it clears the context and decoder state but
    /// retains the previously recorded draw/read surfaces. Any non-zero
    /// handle makes this a full bind: every handle is validated before a
    /// single native call is issued, and a native rejection leaves all state
    /// untouched.
    pub fn bind_context(&self, context: Handle, draw: Handle, read: Handle) -> bool {
        let mut inner = self.inner.lock();

        let mut ctx: Option<(Handle, Arc<RenderContext>)> = None;
        let mut draw_surface: Option<(Handle, Arc<WindowSurface>)> = None;
        let mut read_surface: Option<(Handle, Arc<WindowSurface>)> = None;

        if context != 0 || draw != 0 || read != 0 {
            let Some(c) = inner.contexts.get(&context) else {
                return false;
            };
            ctx = Some((context, Arc::clone(c)));
            let Some(d) = inner.surfaces.get(&draw) else {
                return false;
            };
            draw_surface = Some((draw, Arc::clone(d)));
            if read == draw {
                read_surface = draw_surface.clone();
            } else {
                let Some(r) = inner.surfaces.get(&read) else {
                    return false;
                };
                read_surface = Some((read, Arc::clone(r)));
            }
        }

        let thread = thread::current().id();
        if ctx.is_none() {
            let has_current = inner
                .bindings
                .get(&thread)
                .is_some_and(|b| b.context.is_some());
            if !has_current {
                return false;
            }
        }

        if let Err(err) = self.shared.driver.make_current(
            draw_surface.as_ref().map(|(_, s)| s.native()),
            read_surface.as_ref().map(|(_, s)| s.native()),
            ctx.as_ref().map(|(_, c)| c.native()),
        ) {
            log::error!("bind rejected by the native driver: {err}");
            return false;
        }

        let binding = inner.bindings.entry(thread).or_default();

        // a true unbind notifies the surfaces recorded by the previous bind
        let (notify_draw, notify_read) = if ctx.is_some() {
            (draw_surface.clone(), read_surface.clone())
        } else {
            (binding.draw.clone(), binding.read.clone())
        };
        if let (Some((_, d)), Some((_, r))) = (&notify_draw, &notify_read) {
            let native_ctx = ctx.as_ref().map(|(_, c)| c.native());
            if Arc::ptr_eq(d, r) {
                d.bind(native_ctx, SurfaceBinding::ReadDraw);
            } else {
                d.bind(native_ctx, SurfaceBinding::Draw);
                r.bind(native_ctx, SurfaceBinding::Read);
            }
        }

        match ctx {
            Some((handle, c)) => {
                binding.decoder = Some((c.api(), c.decoder_state()));
                binding.context = Some((handle, c));
                binding.draw = draw_surface;
                binding.read = read_surface;
            }
            None => {
                binding.context = None;
                binding.decoder = None;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// The calling thread's `(context, draw, read)` handle triple.
    #[must_use]
    pub fn current_binding(&self) -> (Handle, Handle, Handle) {
        let inner = self.inner.lock();
        inner
            .bindings
            .get(&thread::current().id())
            .map_or((0, 0, 0), |b| {
                (
                    b.context.as_ref().map_or(0, |(h, _)| *h),
                    b.draw.as_ref().map_or(0, |(h, _)| *h),
                    b.read.as_ref().map_or(0, |(h, _)| *h),
                )
            })
    }

    /// The decoder state active for the calling thread, selected by the
    /// bound context's API version.
    #[must_use]
    pub fn current_decoder_state(&self) -> Option<(ApiVersion, DecoderState)> {
        let inner = self.inner.lock();
        inner
            .bindings
            .get(&thread::current().id())
            .and_then(|b| b.decoder)
    }

    #[must_use]
    pub fn context_count(&self) -> usize {
        self.inner.lock().contexts.len()
    }

    #[must_use]
    pub fn surface_count(&self) -> usize {
        self.inner.lock().surfaces.len()
    }

    #[must_use]
    pub fn color_buffer_count(&self) -> usize {
        self.inner.lock().colorbuffers.len()
    }

    /// Client reference count of a color buffer, if the handle is live.
    #[must_use]
    pub fn color_buffer_ref_count(&self, handle: Handle) -> Option<i32> {
        self.inner.lock().colorbuffers.get(&handle).map(|e| e.refcount)
    }

    /// A live window surface.
    #[must_use]
    pub fn window_surface(&self, handle: Handle) -> Option<Arc<WindowSurface>> {
        self.inner.lock().surfaces.get(&handle).cloned()
    }

    /// The share group of a live context.
    #[must_use]
    pub fn context_share_group(&self, handle: Handle) -> Option<Arc<ShareGroup>> {
        self.inner
            .lock()
            .contexts
            .get(&handle)
            .and_then(|c| c.share_group().cloned())
    }

    /// Number of live share-group memberships.
    #[must_use]
    pub fn share_group_entries(&self) -> usize {
        self.inner.lock().share_groups.live_entries()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let driver = self.shared.driver.as_ref();

        if let Some(sub) = inner.display.take_subwindow() {
            if let Err(err) = driver.make_current(None, None, None) {
                log::warn!("finalize: unbind failed: {err}");
            }
            if let Err(err) = driver.destroy_surface(sub.surface) {
                log::warn!("finalize: subwindow surface release failed: {err}");
            }
            if let Err(err) = self.windowing.destroy_subwindow(sub.drawable) {
                log::warn!("finalize: subwindow release failed: {err}");
            }
        }

        // dropping the tables runs the per-object teardown paths
        inner.bindings.clear();
        inner.colorbuffers.clear();
        inner.surfaces.clear();
        inner.contexts.clear();

        if let Err(err) = driver.make_current(None, None, None) {
            log::warn!("finalize: unbind failed: {err}");
        }
        if let Some(fallback) = self.shared.fallback.lock().take() {
            if let Err(err) = driver.destroy_surface(fallback) {
                log::warn!("finalize: fallback surface release failed: {err}");
            }
        }
        inner.display.destroy(driver);
    }
}
