//! Present Pipeline
//!
//! Everything between a posted color buffer and the screen: the output
//! subwindow, the per-frame capture callback, scroll/rotation, overlay
//! textures, the highlight outline and the screenshot effect. All of it
//! runs under the registry lock and inside scoped current-state guards, so
//! a post on one thread never permanently disturbs another thread's
//! binding.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::driver::{
    CurrentGuard, DrawParams, GlDriver, ImageRect, NativeContextId, NativeDrawable, NativeImageId,
    NativeSurfaceId, PixelFormat,
};
use crate::errors::DriverResult;

use super::{ConfigId, Handle, Registry, RegistryInner};

/// One frame delivered to the registered per-frame callback.
pub struct PostedFrame<'a> {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA pixels, top-left origin.
    pub pixels: &'a [u8],
}

/// Callback invoked once per presented frame with the captured pixels.
pub type PostCallback = Box<dyn FnMut(PostedFrame<'_>) + Send>;

/// Outline color drawn around the output when window highlighting is on.
const HIGHLIGHT_COLOR: [f32; 4] = [230.0 / 255.0, 25.0 / 255.0, 94.0 / 255.0, 1.0];

/// Duration of the screenshot shrink effect.
const SCREENSHOT_EFFECT: Duration = Duration::from_millis(250);

pub(crate) struct SubwindowState {
    pub(crate) drawable: NativeDrawable,
    pub(crate) surface: NativeSurfaceId,
}

struct CaptureState {
    surface: NativeSurfaceId,
    /// Pixels of the most recently captured frame; feeds the screenshot
    /// effect.
    last_frame: Vec<u8>,
}

pub(crate) struct DisplayState {
    config: ConfigId,
    window_context: NativeContextId,
    pbuffer_context: NativeContextId,
    pbuffer_surface: NativeSurfaceId,
    subwindow: Option<SubwindowState>,
    /// Output dimensions; swapped by ±90° rotation changes.
    out_width: u32,
    out_height: u32,
    scroll: (i32, i32),
    rotation: f32,
    last_posted: Handle,
    on_post: Option<PostCallback>,
    capture: Option<CaptureState>,
    /// Overlay texture and its width/height aspect.
    logo: Option<(NativeImageId, f32)>,
    start_screen: Option<NativeImageId>,
    highlight: bool,
}

impl DisplayState {
    pub(crate) fn new(
        config: ConfigId,
        window_context: NativeContextId,
        pbuffer_context: NativeContextId,
        pbuffer_surface: NativeSurfaceId,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            config,
            window_context,
            pbuffer_context,
            pbuffer_surface,
            subwindow: None,
            out_width: width,
            out_height: height,
            scroll: (0, 0),
            rotation: 0.0,
            last_posted: 0,
            on_post: None,
            capture: None,
            logo: None,
            start_screen: None,
            highlight: false,
        }
    }

    pub(crate) fn take_subwindow(&mut self) -> Option<SubwindowState> {
        self.subwindow.take()
    }

    /// Releases every native object the display owns. Finalization only.
    pub(crate) fn destroy(&mut self, driver: &dyn GlDriver) {
        if let Some(capture) = self.capture.take() {
            if let Err(err) = driver.destroy_surface(capture.surface) {
                log::warn!("finalize: capture surface release failed: {err}");
            }
        }
        for image in self
            .logo
            .take()
            .map(|(image, _)| image)
            .into_iter()
            .chain(self.start_screen.take())
        {
            if let Err(err) = driver.destroy_image(image) {
                log::warn!("finalize: overlay texture release failed: {err}");
            }
        }
        if let Err(err) = driver.destroy_surface(self.pbuffer_surface) {
            log::warn!("finalize: display pbuffer release failed: {err}");
        }
        if let Err(err) = driver.destroy_context(self.pbuffer_context) {
            log::warn!("finalize: pbuffer context release failed: {err}");
        }
        if let Err(err) = driver.destroy_context(self.window_context) {
            log::warn!("finalize: window context release failed: {err}");
        }
    }
}

/// Creates and fills an overlay texture, discarding it on upload failure.
fn upload_overlay(
    driver: &dyn GlDriver,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> DriverResult<NativeImageId> {
    let image = driver.create_image(width, height, PixelFormat::Rgba8)?;
    let rect = ImageRect {
        x: 0,
        y: 0,
        width,
        height,
    };
    if let Err(err) = driver.update_image(image, rect, PixelFormat::Rgba8, rgba) {
        if let Err(err) = driver.destroy_image(image) {
            log::warn!("failed to discard partially built overlay: {err}");
        }
        return Err(err);
    }
    Ok(image)
}

impl Registry {
    /// Presents a color buffer to the output subwindow.
    ///
    /// The handle is recorded as last-posted even when there is nothing to
    /// draw to yet, so a later geometry change can repost it.
    pub fn post(&self, colorbuffer: Handle) -> bool {
        let mut inner = self.inner.lock();
        self.post_locked(&mut inner, colorbuffer)
    }

    /// Re-presents the last posted color buffer.
    pub fn repost(&self) -> bool {
        let mut inner = self.inner.lock();
        let last = inner.display.last_posted;
        if last == 0 {
            return false;
        }
        self.post_locked(&mut inner, last)
    }

    fn post_locked(&self, inner: &mut RegistryInner, colorbuffer: Handle) -> bool {
        let Some(entry) = inner.colorbuffers.get(&colorbuffer) else {
            return false;
        };
        let cb = Arc::clone(&entry.cb);
        inner.display.last_posted = colorbuffer;

        let (out_surface, window_context) = match inner.display.subwindow.as_ref() {
            Some(sub) => (sub.surface, inner.display.window_context),
            // no subwindow yet; the handle stays recorded for repost
            None => return false,
        };

        let driver = self.shared.driver.as_ref();
        let _bound = match CurrentGuard::acquire(
            driver,
            Some(out_surface),
            Some(out_surface),
            Some(window_context),
        ) {
            Ok(guard) => guard,
            Err(err) => {
                log::error!("post: could not bind the output surface: {err}");
                return false;
            }
        };

        // capture pass: render unrotated at guest size, read back, deliver
        if let (Some(on_post), Some(capture)) = (
            inner.display.on_post.as_mut(),
            inner.display.capture.as_mut(),
        ) {
            match CurrentGuard::acquire(
                driver,
                Some(capture.surface),
                Some(capture.surface),
                Some(window_context),
            ) {
                Ok(_capture_bound) => {
                    driver.set_view(self.width, self.height);
                    if let Err(err) = cb.post(&DrawParams::default()) {
                        log::warn!("post: capture render failed: {err}");
                    } else {
                        match driver.read_pixels(self.width, self.height) {
                            Ok(pixels) => {
                                capture.last_frame = pixels;
                                on_post(PostedFrame {
                                    width: self.width,
                                    height: self.height,
                                    pixels: &capture.last_frame,
                                });
                            }
                            Err(err) => log::warn!("post: capture readback failed: {err}"),
                        }
                    }
                }
                Err(err) => log::warn!("post: could not bind the capture surface: {err}"),
            }
            driver.set_view(inner.display.out_width, inner.display.out_height);
        }

        if let Err(err) = driver.clear() {
            log::warn!("post: clear failed: {err}");
        }

        let params = DrawParams {
            offset: inner.display.scroll,
            rotation_deg: inner.display.rotation,
            dest: None,
            flip_vertical: false,
        };
        let mut ok = match cb.post(&params) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("post: render failed: {err}");
                false
            }
        };

        if let Some((logo, aspect)) = inner.display.logo {
            let dest = self.logo_rect(inner.display.rotation, aspect);
            if let Err(err) = driver.draw_image(
                logo,
                &DrawParams {
                    dest: Some(dest),
                    ..DrawParams::default()
                },
            ) {
                log::warn!("post: logo overlay failed: {err}");
            }
        }

        if inner.display.highlight {
            if let Err(err) = driver.draw_outline(HIGHLIGHT_COLOR) {
                log::warn!("post: highlight outline failed: {err}");
            }
        }

        if ok {
            if let Err(err) = driver.swap_buffers(out_surface) {
                log::warn!("post: swap failed: {err}");
                ok = false;
            }
        }
        ok
    }

    /// Corner placement for the logo overlay, sized against the guest
    /// diagonal.
    fn logo_rect(&self, rotation: f32, aspect: f32) -> ImageRect {
        const PAD: i32 = 8;
        let diag = self.width + self.height;
        let w = (diag as f32 / 8.0) as u32;
        let h = if aspect > 0.0 {
            (w as f32 / aspect) as u32
        } else {
            w
        };
        // the guest's bottom corner moves when the display is rotated
        let view_h = if rotation == 90.0 || rotation == 270.0 {
            self.width
        } else {
            self.height
        };
        ImageRect {
            x: PAD,
            y: view_h as i32 - h as i32 - PAD,
            width: w,
            height: h,
        }
    }

    // ------------------------------------------------------------------
    // Output window lifecycle
    // ------------------------------------------------------------------

    /// Creates the output subwindow and its window surface, then shows the
    /// last posted buffer (or the start screen when nothing was posted
    /// yet). Fails when a subwindow already exists.
    pub fn setup_subwindow(
        &self,
        parent: NativeDrawable,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rotation: f32,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.display.subwindow.is_some() {
            return false;
        }

        let drawable = match self.windowing.create_subwindow(parent, x, y, width, height) {
            Ok(drawable) => drawable,
            Err(err) => {
                log::error!("failed to create the output subwindow: {err}");
                return false;
            }
        };

        let driver = self.shared.driver.as_ref();
        let surface = match driver.create_window_surface(inner.display.config, drawable) {
            Ok(surface) => surface,
            Err(err) => {
                log::error!("failed to create the output surface: {err}");
                if let Err(err) = self.windowing.destroy_subwindow(drawable) {
                    log::warn!("subwindow cleanup failed: {err}");
                }
                return false;
            }
        };

        let bound = match CurrentGuard::acquire(
            driver,
            Some(surface),
            Some(surface),
            Some(inner.display.window_context),
        ) {
            Ok(guard) => guard,
            Err(err) => {
                log::error!("could not bind the new output surface: {err}");
                if let Err(err) = driver.destroy_surface(surface) {
                    log::warn!("output surface cleanup failed: {err}");
                }
                if let Err(err) = self.windowing.destroy_subwindow(drawable) {
                    log::warn!("subwindow cleanup failed: {err}");
                }
                return false;
            }
        };

        driver.set_view(width, height);
        inner.display.rotation = rotation;
        inner.display.out_width = width;
        inner.display.out_height = height;
        inner.display.subwindow = Some(SubwindowState { drawable, surface });

        let last = inner.display.last_posted;
        if last != 0 {
            self.post_locked(&mut inner, last);
        } else if let Some(image) = inner.display.start_screen {
            let dest = ImageRect {
                x: 0,
                y: 0,
                width,
                height,
            };
            if let Err(err) = driver.draw_image(
                image,
                &DrawParams {
                    dest: Some(dest),
                    ..DrawParams::default()
                },
            ) {
                log::warn!("start screen draw failed: {err}");
            } else if let Err(err) = driver.swap_buffers(surface) {
                log::warn!("start screen swap failed: {err}");
            }
        }

        drop(bound);
        true
    }

    /// Destroys the output subwindow. Returns `false` when none exists.
    pub fn remove_subwindow(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some(sub) = inner.display.subwindow.take() else {
            return false;
        };
        let driver = self.shared.driver.as_ref();
        if let Err(err) = driver.make_current(None, None, None) {
            log::warn!("unbind before subwindow removal failed: {err}");
        }
        if let Err(err) = driver.destroy_surface(sub.surface) {
            log::warn!("output surface release failed: {err}");
        }
        if let Err(err) = self.windowing.destroy_subwindow(sub.drawable) {
            log::warn!("subwindow release failed: {err}");
        }
        true
    }

    // ------------------------------------------------------------------
    // Display controls
    // ------------------------------------------------------------------

    /// Rotates the output. A ±90° change swaps the output dimensions. The
    /// last posted buffer is re-presented with the new transform.
    pub fn set_display_rotation(&self, rotation: f32) {
        let mut inner = self.inner.lock();
        let delta = rotation - inner.display.rotation;
        if delta == 90.0 || delta == -90.0 {
            let display = &mut inner.display;
            std::mem::swap(&mut display.out_width, &mut display.out_height);
        }
        inner.display.rotation = rotation;
        let last = inner.display.last_posted;
        if last != 0 {
            self.post_locked(&mut inner, last);
        }
    }

    /// Sets the scroll offset applied by subsequent posts.
    pub fn scroll_viewport(&self, x: i32, y: i32) {
        self.inner.lock().display.scroll = (x, y);
    }

    /// Re-derives the output view transform.
    pub fn set_viewport(&self, width: u32, height: u32) {
        let inner = self.inner.lock();
        let Some(sub) = inner.display.subwindow.as_ref() else {
            return;
        };
        let driver = self.shared.driver.as_ref();
        match CurrentGuard::acquire(
            driver,
            Some(sub.surface),
            Some(sub.surface),
            Some(inner.display.window_context),
        ) {
            Ok(_bound) => driver.set_view(width, height),
            Err(err) => log::warn!("set_viewport: could not bind the output surface: {err}"),
        }
    }

    /// Installs or replaces the per-frame callback. The fixed-size capture
    /// surface is allocated on first registration; failure to allocate it
    /// fails the registration.
    pub fn register_post_callback(&self, on_post: Option<PostCallback>) -> bool {
        let mut inner = self.inner.lock();
        if on_post.is_some() && inner.display.capture.is_none() {
            match self
                .shared
                .driver
                .create_pbuffer_surface(inner.display.config, self.width, self.height)
            {
                Ok(surface) => {
                    inner.display.capture = Some(CaptureState {
                        surface,
                        last_frame: Vec::new(),
                    });
                }
                Err(err) => {
                    log::error!("failed to allocate the capture surface: {err}");
                    return false;
                }
            }
        }
        inner.display.on_post = on_post;
        true
    }

    /// Uploads the logo overlay texture; empty pixel data clears it.
    pub fn set_logo(&self, rgba: &[u8], width: u32, height: u32) {
        let mut inner = self.inner.lock();
        let driver = self.shared.driver.as_ref();
        let _bound = match CurrentGuard::acquire(
            driver,
            Some(inner.display.pbuffer_surface),
            Some(inner.display.pbuffer_surface),
            Some(inner.display.pbuffer_context),
        ) {
            Ok(guard) => Some(guard),
            Err(err) => {
                log::warn!("set_logo: could not bind the display pbuffer: {err}");
                None
            }
        };

        if let Some((old, _)) = inner.display.logo.take() {
            if let Err(err) = driver.destroy_image(old) {
                log::warn!("failed to release previous logo texture: {err}");
            }
        }
        if rgba.is_empty() || width == 0 || height == 0 {
            return;
        }
        let aspect = width as f32 / height as f32;
        match upload_overlay(driver, width, height, rgba) {
            Ok(image) => inner.display.logo = Some((image, aspect)),
            Err(err) => log::error!("failed to upload logo texture: {err}"),
        }
    }

    /// Uploads the start-screen texture shown before the first post; empty
    /// pixel data clears it.
    pub fn set_start_screen(&self, rgba: &[u8], width: u32, height: u32) {
        let mut inner = self.inner.lock();
        let driver = self.shared.driver.as_ref();
        let _bound = match CurrentGuard::acquire(
            driver,
            Some(inner.display.pbuffer_surface),
            Some(inner.display.pbuffer_surface),
            Some(inner.display.pbuffer_context),
        ) {
            Ok(guard) => Some(guard),
            Err(err) => {
                log::warn!("set_start_screen: could not bind the display pbuffer: {err}");
                None
            }
        };

        if let Some(old) = inner.display.start_screen.take() {
            if let Err(err) = driver.destroy_image(old) {
                log::warn!("failed to release previous start screen: {err}");
            }
        }
        if rgba.is_empty() || width == 0 || height == 0 {
            return;
        }
        match upload_overlay(driver, width, height, rgba) {
            Ok(image) => inner.display.start_screen = Some(image),
            Err(err) => log::error!("failed to upload start screen: {err}"),
        }
    }

    /// Toggles the highlight outline drawn around the output.
    pub fn set_window_highlight(&self, on: bool) {
        self.inner.lock().display.highlight = on;
    }

    /// Plays the screenshot effect: the last captured frame shrinks to grey
    /// over a fixed duration, then the last posted buffer is re-presented.
    ///
    /// The registry lock is reacquired for each animation frame so other
    /// threads keep making progress between iterations. Requires a
    /// subwindow and at least one captured frame.
    pub fn play_screenshot_animation(&self) -> bool {
        let (frame, width, height) = {
            let inner = self.inner.lock();
            if inner.display.subwindow.is_none() {
                return false;
            }
            let Some(capture) = inner.display.capture.as_ref() else {
                return false;
            };
            if capture.last_frame.is_empty() {
                return false;
            }
            (capture.last_frame.clone(), self.width, self.height)
        };

        let mut grey = frame.clone();
        for px in grey.chunks_exact_mut(4) {
            let luma = (f32::from(px[0]) * 0.299
                + f32::from(px[1]) * 0.587
                + f32::from(px[2]) * 0.114) as u8;
            px[0] = luma;
            px[1] = luma;
            px[2] = luma;
            px[3] = 255;
        }

        let driver = self.shared.driver.as_ref();
        let (frame_tex, grey_tex) = {
            let inner = self.inner.lock();
            let _bound = match CurrentGuard::acquire(
                driver,
                Some(inner.display.pbuffer_surface),
                Some(inner.display.pbuffer_surface),
                Some(inner.display.pbuffer_context),
            ) {
                Ok(guard) => Some(guard),
                Err(err) => {
                    log::warn!("screenshot effect: could not bind the display pbuffer: {err}");
                    None
                }
            };
            let frame_tex = match upload_overlay(driver, width, height, &frame) {
                Ok(image) => image,
                Err(err) => {
                    log::error!("screenshot effect: frame upload failed: {err}");
                    return false;
                }
            };
            let grey_tex = match upload_overlay(driver, width, height, &grey) {
                Ok(image) => image,
                Err(err) => {
                    log::error!("screenshot effect: grey upload failed: {err}");
                    if let Err(err) = driver.destroy_image(frame_tex) {
                        log::warn!("screenshot effect cleanup failed: {err}");
                    }
                    return false;
                }
            };
            (frame_tex, grey_tex)
        };

        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            {
                let inner = self.inner.lock();
                let Some(sub) = inner.display.subwindow.as_ref() else {
                    break;
                };
                match CurrentGuard::acquire(
                    driver,
                    Some(sub.surface),
                    Some(sub.surface),
                    Some(inner.display.window_context),
                ) {
                    Ok(_bound) => {
                        // captured frame as backdrop
                        if let Err(err) = driver.draw_image(
                            frame_tex,
                            &DrawParams {
                                offset: inner.display.scroll,
                                rotation_deg: inner.display.rotation,
                                dest: None,
                                flip_vertical: true,
                            },
                        ) {
                            log::warn!("screenshot effect: backdrop draw failed: {err}");
                        }

                        // grey copy shrinking non-linearly toward the center
                        let t = elapsed.as_secs_f32() / SCREENSHOT_EFFECT.as_secs_f32();
                        let factor = (1.0 - 0.98 * t * t).max(0.0);
                        let w = (width as f32 * factor) as u32;
                        let h = (height as f32 * factor) as u32;
                        let dest = ImageRect {
                            x: (inner.display.out_width as i32 - w as i32) / 2,
                            y: (inner.display.out_height as i32 - h as i32) / 2,
                            width: w,
                            height: h,
                        };
                        if let Err(err) = driver.draw_image(
                            grey_tex,
                            &DrawParams {
                                rotation_deg: inner.display.rotation,
                                dest: Some(dest),
                                flip_vertical: true,
                                ..DrawParams::default()
                            },
                        ) {
                            log::warn!("screenshot effect: shrink draw failed: {err}");
                        }

                        if let Err(err) = driver.swap_buffers(sub.surface) {
                            log::warn!("screenshot effect: swap failed: {err}");
                        }
                    }
                    Err(err) => {
                        log::warn!("screenshot effect: could not bind the output: {err}");
                    }
                }
            }
            // lock released between iterations
            if elapsed >= SCREENSHOT_EFFECT {
                break;
            }
        }

        {
            let inner = self.inner.lock();
            let _bound = CurrentGuard::acquire(
                driver,
                Some(inner.display.pbuffer_surface),
                Some(inner.display.pbuffer_surface),
                Some(inner.display.pbuffer_context),
            )
            .ok();
            for image in [frame_tex, grey_tex] {
                if let Err(err) = driver.destroy_image(image) {
                    log::warn!("screenshot effect: texture release failed: {err}");
                }
            }
        }

        // the effect leaves the screen grey; refresh it
        self.repost();
        true
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Handle recorded by the most recent post, `0` when none.
    #[must_use]
    pub fn last_posted_color_buffer(&self) -> Handle {
        self.inner.lock().display.last_posted
    }

    #[must_use]
    pub fn has_subwindow(&self) -> bool {
        self.inner.lock().display.subwindow.is_some()
    }

    /// Current output dimensions (post-rotation).
    #[must_use]
    pub fn output_size(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        (inner.display.out_width, inner.display.out_height)
    }

    #[must_use]
    pub fn display_rotation(&self) -> f32 {
        self.inner.lock().display.rotation
    }

    #[must_use]
    pub fn window_highlight(&self) -> bool {
        self.inner.lock().display.highlight
    }
}
