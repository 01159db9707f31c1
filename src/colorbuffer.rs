//! Color Buffers
//!
//! A [`ColorBuffer`] is the unit of presentable content: fixed-size pixel
//! storage owned through the driver facade, updatable by sub-rectangle and
//! bindable as a texture or renderbuffer target of whatever context is
//! current. Reference counting lives in the registry table; the `Arc`
//! carrying the buffer only keeps the storage alive for surfaces that still
//! reference it after the table entry is gone.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{DrawParams, GlDriver, ImageRect, NativeImageId, PixelFormat};
use crate::errors::DriverResult;
use crate::range::{Range, RangeList};

pub struct ColorBuffer {
    driver: Arc<dyn GlDriver>,
    image: NativeImageId,
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Scanline ranges touched since the last present.
    dirty: Mutex<RangeList>,
}

impl ColorBuffer {
    /// Allocates the native pixel storage. The partially constructed object
    /// is discarded on failure.
    pub(crate) fn create(
        driver: Arc<dyn GlDriver>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> DriverResult<Self> {
        let image = driver.create_image(width, height, format)?;
        Ok(Self {
            driver,
            image,
            width,
            height,
            format,
            dirty: Mutex::new(RangeList::new()),
        })
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

    #[inline]
    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline]
    #[must_use]
    pub fn image(&self) -> NativeImageId {
        self.image
    }

    /// Number of dirty scanline ranges currently recorded.
    #[must_use]
    pub fn dirty_ranges(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Sub-rectangle pixel upload, recording the touched scanlines as dirty.
    pub fn sub_update(
        &self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
    ) -> DriverResult<()> {
        let rect = ImageRect {
            x,
            y,
            width,
            height,
        };
        self.driver.update_image(self.image, rect, format, pixels)?;
        self.dirty.lock().add(Range::new(y, height as i32));
        Ok(())
    }

    /// Attaches the storage as the texture target of the current context.
    pub fn bind_to_texture(&self) -> DriverResult<()> {
        self.driver.bind_image_to_texture(self.image)
    }

    /// Attaches the storage as the renderbuffer target of the current
    /// context.
    pub fn bind_to_renderbuffer(&self) -> DriverResult<()> {
        self.driver.bind_image_to_renderbuffer(self.image)
    }

    /// Renders the buffer into the current draw surface, draining the dirty
    /// set.
    pub fn post(&self, params: &DrawParams) -> DriverResult<()> {
        {
            let mut dirty = self.dirty.lock();
            if !dirty.is_empty() {
                dirty.merge();
                log::trace!(
                    "posting color buffer with {} dirty scanline range(s)",
                    dirty.len()
                );
                dirty.clear();
            }
        }
        self.driver.draw_image(self.image, params)
    }
}

impl Drop for ColorBuffer {
    fn drop(&mut self) {
        if let Err(err) = self.driver.destroy_image(self.image) {
            log::warn!("failed to release color buffer storage: {err}");
        }
    }
}
