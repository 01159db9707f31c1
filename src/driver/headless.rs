//! Software Driver
//!
//! [`HeadlessDriver`] implements the full [`GlDriver`] + [`SubwindowHost`]
//! facade in memory: images and surfaces are plain RGBA byte buffers and
//! draws are axis-aligned blits. It backs headless operation (no display
//! attached) and the crate's test suite.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::{ApiSupport, ConfigId, DriverCaps, FbConfig, SurfaceKind};
use crate::decoder::ApiVersion;
use crate::errors::{DriverError, DriverResult};

use super::{
    CurrentState, DrawParams, GlDriver, ImageRect, NativeContextId, NativeDrawable, NativeImageId,
    NativeSurfaceId, PixelFormat, SubwindowHost,
};

/// Running object/operation counters, exposed for inspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessStats {
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub surfaces_created: u64,
    pub surfaces_destroyed: u64,
    pub images_created: u64,
    pub images_destroyed: u64,
    pub make_current_calls: u64,
    pub swaps: u64,
}

struct ContextRec {
    api: ApiVersion,
    #[allow(dead_code, reason = "kept for driver-level introspection")]
    share: Option<u64>,
}

struct SurfaceRec {
    width: u32,
    height: u32,
    /// RGBA8, row-major, top-left origin.
    pixels: Vec<u8>,
}

struct ImageRec {
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Stored as RGBA8 regardless of upload format.
    pixels: Vec<u8>,
}

#[derive(Default)]
struct HeadlessState {
    next_id: u64,
    contexts: FxHashMap<u64, ContextRec>,
    surfaces: FxHashMap<u64, SurfaceRec>,
    images: FxHashMap<u64, ImageRec>,
    subwindows: FxHashSet<u64>,
    current: CurrentState,
    view: (u32, u32),
    swap_interval: u32,
    bound_texture: Option<u64>,
    bound_renderbuffer: Option<u64>,
    stats: HeadlessStats,
}

impl HeadlessState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn current_draw_surface(&mut self) -> DriverResult<&mut SurfaceRec> {
        let id = self.current.draw.ok_or(DriverError::NoCurrent)?;
        self.surfaces
            .get_mut(&id.0)
            .ok_or(DriverError::UnknownId("surface"))
    }
}

/// In-memory software implementation of the driver facade.
pub struct HeadlessDriver {
    state: Mutex<HeadlessState>,
    configs: Vec<FbConfig>,
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::with_configs(default_configs())
    }

    #[must_use]
    pub fn with_configs(configs: Vec<FbConfig>) -> Self {
        Self {
            state: Mutex::new(HeadlessState::default()),
            configs,
        }
    }

    #[must_use]
    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats
    }

    #[must_use]
    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    #[must_use]
    pub fn live_surfaces(&self) -> usize {
        self.state.lock().surfaces.len()
    }

    #[must_use]
    pub fn live_images(&self) -> usize {
        self.state.lock().images.len()
    }

    /// Image currently bound as the texture target, if any.
    #[must_use]
    pub fn bound_texture(&self) -> Option<NativeImageId> {
        self.state.lock().bound_texture.map(NativeImageId)
    }

    /// Image currently bound as the renderbuffer target, if any.
    #[must_use]
    pub fn bound_renderbuffer(&self) -> Option<NativeImageId> {
        self.state.lock().bound_renderbuffer.map(NativeImageId)
    }

    #[must_use]
    pub fn swap_interval(&self) -> u32 {
        self.state.lock().swap_interval
    }

    /// API version a context was created for, if it exists.
    #[must_use]
    pub fn context_api(&self, context: NativeContextId) -> Option<ApiVersion> {
        self.state
            .lock()
            .contexts
            .get(&context.0)
            .map(|rec| rec.api)
    }

    /// Geometry and storage format of an image, if it exists.
    #[must_use]
    pub fn image_info(&self, image: NativeImageId) -> Option<(u32, u32, PixelFormat)> {
        self.state
            .lock()
            .images
            .get(&image.0)
            .map(|rec| (rec.width, rec.height, rec.format))
    }

    /// RGBA contents of an image, if it exists.
    #[must_use]
    pub fn image_pixels(&self, image: NativeImageId) -> Option<Vec<u8>> {
        self.state
            .lock()
            .images
            .get(&image.0)
            .map(|rec| rec.pixels.clone())
    }

    /// RGBA contents of a surface, if it exists.
    #[must_use]
    pub fn surface_pixels(&self, surface: NativeSurfaceId) -> Option<Vec<u8>> {
        self.state
            .lock()
            .surfaces
            .get(&surface.0)
            .map(|rec| rec.pixels.clone())
    }

    fn check_config(&self, config: ConfigId) -> DriverResult<()> {
        if self.configs.iter().any(|c| c.id == config) {
            Ok(())
        } else {
            Err(DriverError::UnknownConfig)
        }
    }
}

fn default_configs() -> Vec<FbConfig> {
    vec![
        FbConfig {
            id: ConfigId(1),
            red_bits: 8,
            green_bits: 8,
            blue_bits: 8,
            alpha_bits: 8,
            depth_bits: 24,
            stencil_bits: 8,
            surfaces: SurfaceKind::WINDOW | SurfaceKind::PBUFFER,
            apis: ApiSupport::LEGACY,
        },
        FbConfig {
            id: ConfigId(2),
            red_bits: 8,
            green_bits: 8,
            blue_bits: 8,
            alpha_bits: 8,
            depth_bits: 24,
            stencil_bits: 8,
            surfaces: SurfaceKind::WINDOW | SurfaceKind::PBUFFER,
            apis: ApiSupport::LEGACY | ApiSupport::MODERN,
        },
    ]
}

/// Converts one tightly packed upload row into RGBA8.
fn row_to_rgba(format: PixelFormat, row: &[u8], out: &mut [u8]) {
    match format {
        PixelFormat::Rgba8 => out.copy_from_slice(row),
        PixelFormat::Bgra8 => {
            for (dst, src) in out.chunks_exact_mut(4).zip(row.chunks_exact(4)) {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
                dst[3] = src[3];
            }
        }
        PixelFormat::Rgb8 => {
            for (dst, src) in out.chunks_exact_mut(4).zip(row.chunks_exact(3)) {
                dst[0] = src[0];
                dst[1] = src[1];
                dst[2] = src[2];
                dst[3] = 255;
            }
        }
    }
}

/// Clipped RGBA blit of `src` (src_w×src_h) into `dst` at (`dx`, `dy`).
fn blit_rgba(
    dst: &mut [u8],
    dst_w: u32,
    dst_h: u32,
    src: &[u8],
    src_w: u32,
    src_h: u32,
    dx: i64,
    dy: i64,
) {
    for row in 0..i64::from(src_h) {
        let out_y = dy + row;
        if out_y < 0 || out_y >= i64::from(dst_h) {
            continue;
        }
        let src_x0 = (-dx).clamp(0, i64::from(src_w)) as u32;
        let out_x0 = dx.clamp(0, i64::from(dst_w)) as u32;
        let span = (i64::from(src_w) - i64::from(src_x0))
            .min(i64::from(dst_w) - i64::from(out_x0))
            .max(0) as u32;
        if span == 0 {
            continue;
        }
        let src_off = ((row as u32 * src_w + src_x0) * 4) as usize;
        let dst_off = ((out_y as u32 * dst_w + out_x0) * 4) as usize;
        dst[dst_off..dst_off + span as usize * 4]
            .copy_from_slice(&src[src_off..src_off + span as usize * 4]);
    }
}

impl GlDriver for HeadlessDriver {
    fn capabilities(&self) -> DriverCaps {
        DriverCaps {
            version: (1, 4),
            has_modern_api: true,
            has_image_texture_binding: true,
            has_image_renderbuffer_binding: true,
        }
    }

    fn configs(&self) -> Vec<FbConfig> {
        self.configs.clone()
    }

    fn create_context(
        &self,
        config: ConfigId,
        share: Option<NativeContextId>,
        api: ApiVersion,
    ) -> DriverResult<NativeContextId> {
        self.check_config(config)?;
        let mut state = self.state.lock();
        if let Some(share) = share {
            if !state.contexts.contains_key(&share.0) {
                return Err(DriverError::UnknownId("context"));
            }
        }
        let id = state.alloc_id();
        state.contexts.insert(
            id,
            ContextRec {
                api,
                share: share.map(|s| s.0),
            },
        );
        state.stats.contexts_created += 1;
        Ok(NativeContextId(id))
    }

    fn destroy_context(&self, context: NativeContextId) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.contexts.remove(&context.0).is_none() {
            return Err(DriverError::UnknownId("context"));
        }
        if state.current.context == Some(context) {
            state.current.context = None;
        }
        state.stats.contexts_destroyed += 1;
        Ok(())
    }

    fn create_window_surface(
        &self,
        config: ConfigId,
        drawable: NativeDrawable,
    ) -> DriverResult<NativeSurfaceId> {
        self.check_config(config)?;
        let mut state = self.state.lock();
        if !state.subwindows.contains(&drawable.0) {
            return Err(DriverError::UnknownId("drawable"));
        }
        let (width, height) = state.view;
        let (width, height) = (width.max(1), height.max(1));
        let id = state.alloc_id();
        state.surfaces.insert(
            id,
            SurfaceRec {
                width,
                height,
                pixels: vec![0; (width * height * 4) as usize],
            },
        );
        state.stats.surfaces_created += 1;
        Ok(NativeSurfaceId(id))
    }

    fn create_pbuffer_surface(
        &self,
        config: ConfigId,
        width: u32,
        height: u32,
    ) -> DriverResult<NativeSurfaceId> {
        self.check_config(config)?;
        if width == 0 || height == 0 {
            return Err(DriverError::Allocation("zero-sized pbuffer"));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.surfaces.insert(
            id,
            SurfaceRec {
                width,
                height,
                pixels: vec![0; (width * height * 4) as usize],
            },
        );
        state.stats.surfaces_created += 1;
        Ok(NativeSurfaceId(id))
    }

    fn destroy_surface(&self, surface: NativeSurfaceId) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.surfaces.remove(&surface.0).is_none() {
            return Err(DriverError::UnknownId("surface"));
        }
        if state.current.draw == Some(surface) {
            state.current.draw = None;
        }
        if state.current.read == Some(surface) {
            state.current.read = None;
        }
        state.stats.surfaces_destroyed += 1;
        Ok(())
    }

    fn make_current(
        &self,
        draw: Option<NativeSurfaceId>,
        read: Option<NativeSurfaceId>,
        context: Option<NativeContextId>,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        if let Some(s) = draw {
            if !state.surfaces.contains_key(&s.0) {
                return Err(DriverError::UnknownId("surface"));
            }
        }
        if let Some(s) = read {
            if !state.surfaces.contains_key(&s.0) {
                return Err(DriverError::UnknownId("surface"));
            }
        }
        if let Some(c) = context {
            if !state.contexts.contains_key(&c.0) {
                return Err(DriverError::UnknownId("context"));
            }
        }
        state.current = CurrentState {
            context,
            draw,
            read,
        };
        state.stats.make_current_calls += 1;
        Ok(())
    }

    fn current(&self) -> CurrentState {
        self.state.lock().current
    }

    fn swap_buffers(&self, surface: NativeSurfaceId) -> DriverResult<()> {
        let mut state = self.state.lock();
        if !state.surfaces.contains_key(&surface.0) {
            return Err(DriverError::UnknownId("surface"));
        }
        state.stats.swaps += 1;
        Ok(())
    }

    fn set_swap_interval(&self, interval: u32) {
        self.state.lock().swap_interval = interval;
    }

    fn set_view(&self, width: u32, height: u32) {
        self.state.lock().view = (width, height);
    }

    fn create_image(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> DriverResult<NativeImageId> {
        if width == 0 || height == 0 {
            return Err(DriverError::Allocation("zero-sized image"));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.images.insert(
            id,
            ImageRec {
                width,
                height,
                format,
                pixels: vec![0; (width * height * 4) as usize],
            },
        );
        state.stats.images_created += 1;
        Ok(NativeImageId(id))
    }

    fn destroy_image(&self, image: NativeImageId) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.images.remove(&image.0).is_none() {
            return Err(DriverError::UnknownId("image"));
        }
        if state.bound_texture == Some(image.0) {
            state.bound_texture = None;
        }
        if state.bound_renderbuffer == Some(image.0) {
            state.bound_renderbuffer = None;
        }
        state.stats.images_destroyed += 1;
        Ok(())
    }

    fn update_image(
        &self,
        image: NativeImageId,
        rect: ImageRect,
        format: PixelFormat,
        pixels: &[u8],
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        let rec = state
            .images
            .get_mut(&image.0)
            .ok_or(DriverError::UnknownId("image"))?;
        let bpp = format.bytes_per_pixel();
        if pixels.len() < rect.width as usize * rect.height as usize * bpp {
            return Err(DriverError::Unsupported("short pixel upload"));
        }
        for row in 0..rect.height {
            let img_y = rect.y + row as i32;
            if img_y < 0 || img_y as u32 >= rec.height {
                continue;
            }
            let x0 = rect.x.max(0);
            let skip = (x0 - rect.x) as usize;
            let span = (rec.width as i64 - i64::from(x0))
                .min(i64::from(rect.width) - skip as i64)
                .max(0) as usize;
            if span == 0 {
                continue;
            }
            let src_off = (row as usize * rect.width as usize + skip) * bpp;
            let dst_off = (img_y as usize * rec.width as usize + x0 as usize) * 4;
            let src_row = &pixels[src_off..src_off + span * bpp];
            let dst_row = &mut rec.pixels[dst_off..dst_off + span * 4];
            row_to_rgba(format, src_row, dst_row);
        }
        Ok(())
    }

    fn bind_image_to_texture(&self, image: NativeImageId) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.current.context.is_none() {
            return Err(DriverError::NoCurrent);
        }
        if !state.images.contains_key(&image.0) {
            return Err(DriverError::UnknownId("image"));
        }
        state.bound_texture = Some(image.0);
        Ok(())
    }

    fn bind_image_to_renderbuffer(&self, image: NativeImageId) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.current.context.is_none() {
            return Err(DriverError::NoCurrent);
        }
        if !state.images.contains_key(&image.0) {
            return Err(DriverError::UnknownId("image"));
        }
        state.bound_renderbuffer = Some(image.0);
        Ok(())
    }

    fn copy_surface_to_image(
        &self,
        surface: NativeSurfaceId,
        image: NativeImageId,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        let src = state
            .surfaces
            .get(&surface.0)
            .ok_or(DriverError::UnknownId("surface"))?;
        let (src_pixels, src_w, src_h) = (src.pixels.clone(), src.width, src.height);
        let rec = state
            .images
            .get_mut(&image.0)
            .ok_or(DriverError::UnknownId("image"))?;
        let (dst_w, dst_h) = (rec.width, rec.height);
        blit_rgba(
            &mut rec.pixels,
            dst_w,
            dst_h,
            &src_pixels,
            src_w,
            src_h,
            0,
            0,
        );
        Ok(())
    }

    fn clear(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        let surface = state.current_draw_surface()?;
        for px in surface.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 0, 255]);
        }
        Ok(())
    }

    fn draw_image(&self, image: NativeImageId, params: &DrawParams) -> DriverResult<()> {
        // Software path is an axis-aligned compositor: rotation and flip are
        // accepted but not applied.
        let mut state = self.state.lock();
        let rec = state
            .images
            .get(&image.0)
            .ok_or(DriverError::UnknownId("image"))?;
        let (src_pixels, src_w, src_h) = (rec.pixels.clone(), rec.width, rec.height);
        let surface = state.current_draw_surface()?;
        let (dx, dy) = match params.dest {
            Some(rect) => (i64::from(rect.x), i64::from(rect.y)),
            None => (
                (i64::from(surface.width) - i64::from(src_w)) / 2 + i64::from(params.offset.0),
                (i64::from(surface.height) - i64::from(src_h)) / 2 + i64::from(params.offset.1),
            ),
        };
        let (dst_w, dst_h) = (surface.width, surface.height);
        blit_rgba(
            &mut surface.pixels,
            dst_w,
            dst_h,
            &src_pixels,
            src_w,
            src_h,
            dx,
            dy,
        );
        Ok(())
    }

    fn draw_outline(&self, color: [f32; 4]) -> DriverResult<()> {
        let mut state = self.state.lock();
        let surface = state.current_draw_surface()?;
        let rgba = [
            (color[0] * 255.0) as u8,
            (color[1] * 255.0) as u8,
            (color[2] * 255.0) as u8,
            (color[3] * 255.0) as u8,
        ];
        let (w, h) = (surface.width as usize, surface.height as usize);
        for x in 0..w {
            surface.pixels[x * 4..x * 4 + 4].copy_from_slice(&rgba);
            let bottom = ((h - 1) * w + x) * 4;
            surface.pixels[bottom..bottom + 4].copy_from_slice(&rgba);
        }
        for y in 0..h {
            let left = y * w * 4;
            surface.pixels[left..left + 4].copy_from_slice(&rgba);
            let right = (y * w + w - 1) * 4;
            surface.pixels[right..right + 4].copy_from_slice(&rgba);
        }
        Ok(())
    }

    fn read_pixels(&self, width: u32, height: u32) -> DriverResult<Vec<u8>> {
        let mut state = self.state.lock();
        let surface = state.current_draw_surface()?;
        let mut out = vec![0u8; (width * height * 4) as usize];
        let copy_w = width.min(surface.width) as usize;
        for row in 0..height.min(surface.height) as usize {
            let src_off = row * surface.width as usize * 4;
            let dst_off = row * width as usize * 4;
            out[dst_off..dst_off + copy_w * 4]
                .copy_from_slice(&surface.pixels[src_off..src_off + copy_w * 4]);
        }
        Ok(out)
    }
}

impl SubwindowHost for HeadlessDriver {
    fn create_subwindow(
        &self,
        _parent: NativeDrawable,
        _x: i32,
        _y: i32,
        width: u32,
        height: u32,
    ) -> DriverResult<NativeDrawable> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.subwindows.insert(id);
        state.view = (width, height);
        Ok(NativeDrawable(id))
    }

    fn destroy_subwindow(&self, window: NativeDrawable) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.subwindows.remove(&window.0) {
            Ok(())
        } else {
            Err(DriverError::UnknownId("drawable"))
        }
    }
}
