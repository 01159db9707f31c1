//! Window Surfaces
//!
//! A [`WindowSurface`] is a drawable binding point clients render into:
//! an off-screen native surface of fixed size, associated with at most one
//! [`ColorBuffer`] at a time. Many surfaces may reference the same color
//! buffer; the attachment is a shared borrow, not ownership of the refcount.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::colorbuffer::ColorBuffer;
use crate::config::ConfigId;
use crate::driver::{GlDriver, NativeContextId, NativeSurfaceId};
use crate::errors::DriverResult;

/// How a surface is bound to a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceBinding {
    Draw,
    Read,
    /// Single bind serving both roles (draw handle == read handle).
    ReadDraw,
}

pub struct WindowSurface {
    driver: Arc<dyn GlDriver>,
    native: NativeSurfaceId,
    config: ConfigId,
    width: u32,
    height: u32,
    attached: Mutex<Option<Arc<ColorBuffer>>>,
    bound: Mutex<Option<(Option<NativeContextId>, SurfaceBinding)>>,
}

impl WindowSurface {
    /// Creates the native surface. Size is fixed for the surface's lifetime.
    pub(crate) fn create(
        driver: Arc<dyn GlDriver>,
        config: ConfigId,
        width: u32,
        height: u32,
    ) -> DriverResult<Self> {
        let native = driver.create_pbuffer_surface(config, width, height)?;
        Ok(Self {
            driver,
            native,
            config,
            width,
            height,
            attached: Mutex::new(None),
            bound: Mutex::new(None),
        })
    }

    #[inline]
    #[must_use]
    pub fn native(&self) -> NativeSurfaceId {
        self.native
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> ConfigId {
        self.config
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Replaces the attached color buffer.
    pub fn set_color_buffer(&self, colorbuffer: Arc<ColorBuffer>) {
        *self.attached.lock() = Some(colorbuffer);
    }

    /// The currently attached color buffer, if any.
    #[must_use]
    pub fn color_buffer(&self) -> Option<Arc<ColorBuffer>> {
        self.attached.lock().clone()
    }

    /// Records which context this surface is bound to, and in which role.
    pub(crate) fn bind(&self, context: Option<NativeContextId>, mode: SurfaceBinding) {
        *self.bound.lock() = Some((context, mode));
    }

    /// The most recent binding record.
    #[must_use]
    pub fn last_binding(&self) -> Option<(Option<NativeContextId>, SurfaceBinding)> {
        *self.bound.lock()
    }

    /// Copies the surface's rendered contents into the attached color
    /// buffer. No-op when nothing is attached.
    pub fn flush_color_buffer(&self) -> DriverResult<()> {
        let attached = self.attached.lock().clone();
        if let Some(cb) = attached {
            self.driver.copy_surface_to_image(self.native, cb.image())?;
        }
        Ok(())
    }
}

impl Drop for WindowSurface {
    fn drop(&mut self) {
        if let Err(err) = self.driver.destroy_surface(self.native) {
            log::warn!("failed to release window surface: {err}");
        }
    }
}
