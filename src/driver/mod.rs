//! Native Driver Facade
//!
//! Everything the registry needs from the real graphics stack, behind two
//! traits: [`GlDriver`] (context/surface/image primitives, current-state
//! switching, presentation) and [`SubwindowHost`] (native drawable
//! creation). Native objects are referenced by opaque id newtypes; the
//! driver's single "which context is current" state is modeled explicitly as
//! a [`CurrentState`] value and multiplexed across calling threads with the
//! scoped [`CurrentGuard`].

pub mod headless;

use crate::config::{ConfigId, DriverCaps, FbConfig};
use crate::decoder::ApiVersion;
use crate::errors::DriverResult;

/// Opaque id of a native rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeContextId(pub u64);

/// Opaque id of a native surface (window or pbuffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeSurfaceId(pub u64);

/// Opaque id of a native image (pixel storage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeImageId(pub u64);

/// Opaque native drawable handed out by the window system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeDrawable(pub u64);

/// The driver's current-binding triple.
///
/// One piece of process-global state on real drivers; every temporary switch
/// must restore the previous value, which is what [`CurrentGuard`] enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentState {
    pub context: Option<NativeContextId>,
    pub draw: Option<NativeSurfaceId>,
    pub read: Option<NativeSurfaceId>,
}

/// Pixel layout of image storage and uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgb8,
}

impl PixelFormat {
    #[inline]
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Rgb8 => 3,
        }
    }
}

/// A sub-rectangle of an image or surface. `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Placement parameters for [`GlDriver::draw_image`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawParams {
    /// Accumulated scroll offset, applied before rotation.
    pub offset: (i32, i32),
    /// Output rotation in degrees.
    pub rotation_deg: f32,
    /// Explicit destination rectangle; the image is centered in the current
    /// view when absent.
    pub dest: Option<ImageRect>,
    pub flip_vertical: bool,
}

/// The opaque native-driver facade.
///
/// Implementations wrap a real graphics stack (or a software one, see
/// [`headless::HeadlessDriver`]). All calls are synchronous; the registry
/// serializes them under its own lock.
pub trait GlDriver: Send + Sync {
    fn capabilities(&self) -> DriverCaps;

    /// The available framebuffer configurations.
    fn configs(&self) -> Vec<FbConfig>;

    fn create_context(
        &self,
        config: ConfigId,
        share: Option<NativeContextId>,
        api: ApiVersion,
    ) -> DriverResult<NativeContextId>;

    fn destroy_context(&self, context: NativeContextId) -> DriverResult<()>;

    /// Creates an on-screen surface against a native drawable.
    fn create_window_surface(
        &self,
        config: ConfigId,
        drawable: NativeDrawable,
    ) -> DriverResult<NativeSurfaceId>;

    /// Creates an off-screen surface of fixed size.
    fn create_pbuffer_surface(
        &self,
        config: ConfigId,
        width: u32,
        height: u32,
    ) -> DriverResult<NativeSurfaceId>;

    fn destroy_surface(&self, surface: NativeSurfaceId) -> DriverResult<()>;

    /// Switches the process-global current triple. All-`None` unbinds.
    fn make_current(
        &self,
        draw: Option<NativeSurfaceId>,
        read: Option<NativeSurfaceId>,
        context: Option<NativeContextId>,
    ) -> DriverResult<()>;

    /// Snapshot of the current triple.
    fn current(&self) -> CurrentState;

    fn swap_buffers(&self, surface: NativeSurfaceId) -> DriverResult<()>;

    fn set_swap_interval(&self, interval: u32);

    /// Sets the view transform (projection bounds and viewport) used by
    /// subsequent draw calls.
    fn set_view(&self, width: u32, height: u32);

    // ------------------------------------------------------------------
    // Image (pixel storage) primitives
    // ------------------------------------------------------------------

    fn create_image(&self, width: u32, height: u32, format: PixelFormat)
    -> DriverResult<NativeImageId>;

    fn destroy_image(&self, image: NativeImageId) -> DriverResult<()>;

    /// Sub-rectangle pixel upload; `pixels` is tightly packed in `rect`
    /// dimensions and `format`.
    fn update_image(
        &self,
        image: NativeImageId,
        rect: ImageRect,
        format: PixelFormat,
        pixels: &[u8],
    ) -> DriverResult<()>;

    /// Attaches the image as the texture target of the current context.
    fn bind_image_to_texture(&self, image: NativeImageId) -> DriverResult<()>;

    /// Attaches the image as the renderbuffer target of the current context.
    fn bind_image_to_renderbuffer(&self, image: NativeImageId) -> DriverResult<()>;

    /// Copies a surface's rendered contents into an image.
    fn copy_surface_to_image(
        &self,
        surface: NativeSurfaceId,
        image: NativeImageId,
    ) -> DriverResult<()>;

    /// Clears the current draw surface.
    fn clear(&self) -> DriverResult<()>;

    /// Renders an image into the current draw surface.
    fn draw_image(&self, image: NativeImageId, params: &DrawParams) -> DriverResult<()>;

    /// Draws a highlight outline around the current view.
    fn draw_outline(&self, color: [f32; 4]) -> DriverResult<()>;

    /// Reads back the top-left `width`×`height` RGBA pixels of the current
    /// draw surface.
    fn read_pixels(&self, width: u32, height: u32) -> DriverResult<Vec<u8>>;
}

/// Native window-system integration, treated as a black box that creates and
/// destroys drawables for the registry's output subwindow.
pub trait SubwindowHost: Send + Sync {
    fn create_subwindow(
        &self,
        parent: NativeDrawable,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> DriverResult<NativeDrawable>;

    fn destroy_subwindow(&self, window: NativeDrawable) -> DriverResult<()>;
}

/// Scoped save/restore of the driver's current triple.
///
/// Acquisition snapshots whatever is current and switches to the requested
/// triple; dropping the guard restores the snapshot on every exit path,
/// logging (not propagating) a failed restore. This is the only sanctioned
/// way to temporarily disturb the current state during teardown and
/// presentation.
pub struct CurrentGuard<'a> {
    driver: &'a dyn GlDriver,
    saved: CurrentState,
}

impl<'a> CurrentGuard<'a> {
    pub fn acquire(
        driver: &'a dyn GlDriver,
        draw: Option<NativeSurfaceId>,
        read: Option<NativeSurfaceId>,
        context: Option<NativeContextId>,
    ) -> DriverResult<Self> {
        let saved = driver.current();
        driver.make_current(draw, read, context)?;
        Ok(Self { driver, saved })
    }

    /// The triple that was current before acquisition.
    #[must_use]
    pub fn saved(&self) -> CurrentState {
        self.saved
    }
}

impl Drop for CurrentGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) =
            self.driver
                .make_current(self.saved.draw, self.saved.read, self.saved.context)
        {
            log::warn!("failed to restore previous current state: {err}");
        }
    }
}
