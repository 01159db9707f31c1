//! Present Pipeline Tests
//!
//! Tests for:
//! - post/repost: last-posted bookkeeping, failure without a subwindow,
//!   swap on success, binding restoration
//! - Subwindow lifecycle: setup, double-setup rejection, removal
//! - Display controls: rotation dimension swap, scroll, highlight, logo
//! - Capture callback: per-frame delivery with guest-sized pixels
//! - Screenshot effect: capture precondition, repost afterwards
//! - Data plane: color-buffer updates, flush, texture/renderbuffer binds

use std::sync::Arc;

use parking_lot::Mutex;

use glmux::{
    ApiVersion, ConfigId, DecoderTable, GlDriver, HeadlessDriver, NativeDrawable, NoopDecoder,
    PixelFormat, PostCallback, PostedFrame, Registry, SubwindowHost,
};

const CONFIG: ConfigId = ConfigId(1);
const GUEST_W: u32 = 640;
const GUEST_H: u32 = 480;

fn new_registry() -> (Arc<HeadlessDriver>, Registry) {
    let driver = Arc::new(HeadlessDriver::new());
    let registry = Registry::new(
        Arc::clone(&driver) as Arc<dyn GlDriver>,
        Arc::clone(&driver) as Arc<dyn SubwindowHost>,
        DecoderTable::uniform(Arc::new(NoopDecoder::new())),
        GUEST_W,
        GUEST_H,
        None,
    )
    .expect("registry should initialize");
    (driver, registry)
}

fn setup_output(registry: &Registry) {
    assert!(
        registry.setup_subwindow(NativeDrawable(1), 0, 0, GUEST_W, GUEST_H, 0.0),
        "subwindow setup should succeed"
    );
}

fn red_buffer(registry: &Registry, size: u32) -> u32 {
    let cb = registry.create_color_buffer(size, size, PixelFormat::Rgba8);
    assert_ne!(cb, 0);
    let pixels = vec![255u8, 0, 0, 255].repeat((size * size) as usize);
    assert!(registry.update_color_buffer(cb, 0, 0, size, size, PixelFormat::Rgba8, &pixels));
    cb
}

// ============================================================================
// post / repost
// ============================================================================

#[test]
fn post_with_unknown_handle_fails_and_records_nothing() {
    let (_driver, registry) = new_registry();
    setup_output(&registry);

    assert!(!registry.post(777));
    assert_eq!(registry.last_posted_color_buffer(), 0);
}

#[test]
fn post_without_subwindow_records_the_handle_but_fails() {
    let (driver, registry) = new_registry();
    let cb = red_buffer(&registry, 8);
    let swaps_before = driver.stats().swaps;

    assert!(!registry.post(cb), "there is nothing to draw to yet");
    assert_eq!(
        registry.last_posted_color_buffer(),
        cb,
        "the handle is recorded first so a later repost can use it"
    );
    assert_eq!(driver.stats().swaps, swaps_before);
}

#[test]
fn post_with_subwindow_swaps_buffers() {
    let (driver, registry) = new_registry();
    setup_output(&registry);
    let cb = red_buffer(&registry, 8);
    let swaps_before = driver.stats().swaps;

    assert!(registry.post(cb));
    assert_eq!(registry.last_posted_color_buffer(), cb);
    assert_eq!(driver.stats().swaps, swaps_before + 1);
}

#[test]
fn post_restores_the_previous_binding() {
    let (driver, registry) = new_registry();
    setup_output(&registry);

    let ctx = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let surface = registry.create_window_surface(CONFIG, 64, 64);
    assert!(registry.bind_context(ctx, surface, surface));
    let before = driver.current();

    let cb = red_buffer(&registry, 8);
    assert!(registry.post(cb));

    assert_eq!(
        driver.current(),
        before,
        "a post must leave the caller's current state as it found it"
    );
}

#[test]
fn repost_requires_a_previous_post() {
    let (_driver, registry) = new_registry();
    setup_output(&registry);
    assert!(!registry.repost());
}

#[test]
fn repost_reuses_the_last_posted_handle() {
    let (driver, registry) = new_registry();
    setup_output(&registry);
    let cb = red_buffer(&registry, 8);
    assert!(registry.post(cb));

    let swaps_before = driver.stats().swaps;
    assert!(registry.repost());
    assert_eq!(driver.stats().swaps, swaps_before + 1);
    assert_eq!(registry.last_posted_color_buffer(), cb);
}

#[test]
fn subwindow_setup_reposts_earlier_content() {
    let (driver, registry) = new_registry();
    let cb = red_buffer(&registry, 8);
    assert!(!registry.post(cb), "no subwindow yet");

    let swaps_before = driver.stats().swaps;
    setup_output(&registry);
    assert_eq!(
        driver.stats().swaps,
        swaps_before + 1,
        "setup presents the recorded buffer"
    );
}

// ============================================================================
// Subwindow lifecycle
// ============================================================================

#[test]
fn second_subwindow_setup_is_rejected() {
    let (_driver, registry) = new_registry();
    setup_output(&registry);
    assert!(!registry.setup_subwindow(NativeDrawable(1), 0, 0, 320, 240, 0.0));
    assert!(registry.has_subwindow());
}

#[test]
fn remove_subwindow_releases_the_output() {
    let (driver, registry) = new_registry();
    setup_output(&registry);
    let surfaces_before = driver.live_surfaces();

    assert!(registry.remove_subwindow());
    assert!(!registry.has_subwindow());
    assert_eq!(driver.live_surfaces(), surfaces_before - 1);

    assert!(!registry.remove_subwindow(), "nothing left to remove");
}

// ============================================================================
// Display controls
// ============================================================================

#[test]
fn quarter_rotation_swaps_output_dimensions_and_reposts() {
    let (driver, registry) = new_registry();
    setup_output(&registry);
    let cb = red_buffer(&registry, 8);
    assert!(registry.post(cb));
    assert_eq!(registry.output_size(), (GUEST_W, GUEST_H));

    let swaps_before = driver.stats().swaps;
    registry.set_display_rotation(90.0);

    assert_eq!(registry.display_rotation(), 90.0);
    assert_eq!(
        registry.output_size(),
        (GUEST_H, GUEST_W),
        "±90° changes swap the output dimensions"
    );
    assert_eq!(driver.stats().swaps, swaps_before + 1, "content reposted");

    registry.set_display_rotation(270.0);
    assert_eq!(
        registry.output_size(),
        (GUEST_H, GUEST_W),
        "a 180° jump keeps the dimensions"
    );
}

#[test]
fn scroll_offset_is_recorded() {
    let (_driver, registry) = new_registry();
    registry.scroll_viewport(12, -7);
    // the offset feeds the next post; recording it must not require a window
    let cb = red_buffer(&registry, 8);
    assert!(!registry.post(cb));
}

#[test]
fn highlight_toggle_is_observable_and_drawn() {
    let (_driver, registry) = new_registry();
    setup_output(&registry);
    let cb = red_buffer(&registry, 8);

    assert!(!registry.window_highlight());
    registry.set_window_highlight(true);
    assert!(registry.window_highlight());
    assert!(registry.post(cb), "highlight overlay must not break posting");
}

#[test]
fn logo_upload_and_clear_manage_the_overlay_texture() {
    let (driver, registry) = new_registry();
    setup_output(&registry);
    let images_before = driver.live_images();

    let logo = vec![0u8, 255, 0, 255].repeat(16 * 8);
    registry.set_logo(&logo, 16, 8);
    assert_eq!(driver.live_images(), images_before + 1);

    let cb = red_buffer(&registry, 8);
    assert!(registry.post(cb), "logo overlay must not break posting");

    registry.set_logo(&[], 0, 0);
    assert_eq!(driver.live_images(), images_before + 1, "logo freed, buffer kept");
}

#[test]
fn start_screen_shows_when_nothing_was_posted() {
    let (driver, registry) = new_registry();
    let image = vec![0u8, 0, 255, 255].repeat((GUEST_W * GUEST_H) as usize);
    registry.set_start_screen(&image, GUEST_W, GUEST_H);

    let swaps_before = driver.stats().swaps;
    setup_output(&registry);
    assert_eq!(
        driver.stats().swaps,
        swaps_before + 1,
        "the start screen fills the blank output"
    );
}

// ============================================================================
// Capture callback
// ============================================================================

#[test]
fn capture_callback_receives_guest_sized_frames() {
    let (_driver, registry) = new_registry();
    setup_output(&registry);

    let frames: Arc<Mutex<Vec<(u32, u32, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    let callback: PostCallback = Box::new(move |frame: PostedFrame<'_>| {
        sink.lock()
            .push((frame.width, frame.height, frame.pixels.to_vec()));
    });
    assert!(registry.register_post_callback(Some(callback)));

    let cb = red_buffer(&registry, 8);
    assert!(registry.post(cb));

    let frames = frames.lock();
    assert_eq!(frames.len(), 1, "one frame per post");
    let (w, h, pixels) = &frames[0];
    assert_eq!((*w, *h), (GUEST_W, GUEST_H));
    assert_eq!(pixels.len(), (GUEST_W * GUEST_H * 4) as usize);

    // the 8×8 buffer lands centered in the captured frame
    let center = ((GUEST_H / 2) * GUEST_W + GUEST_W / 2) as usize * 4;
    assert_eq!(&pixels[center..center + 4], &[255, 0, 0, 255]);
}

#[test]
fn capture_callback_can_be_cleared() {
    let (_driver, registry) = new_registry();
    setup_output(&registry);

    let frames: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&frames);
    let callback: PostCallback = Box::new(move |_frame: PostedFrame<'_>| {
        *sink.lock() += 1;
    });
    assert!(registry.register_post_callback(Some(callback)));
    let cb = red_buffer(&registry, 8);
    assert!(registry.post(cb));
    assert!(registry.register_post_callback(None));
    assert!(registry.post(cb));

    assert_eq!(*frames.lock(), 1, "no delivery after the callback is cleared");
}

// ============================================================================
// Screenshot effect
// ============================================================================

#[test]
fn screenshot_animation_requires_a_captured_frame() {
    let (_driver, registry) = new_registry();
    setup_output(&registry);
    assert!(
        !registry.play_screenshot_animation(),
        "no capture buffer exists without a registered callback"
    );
}

#[test]
fn screenshot_animation_plays_and_reposts() {
    let (driver, registry) = new_registry();
    setup_output(&registry);
    assert!(registry.register_post_callback(Some(Box::new(|_frame: PostedFrame<'_>| {}))));

    let cb = red_buffer(&registry, 8);
    assert!(registry.post(cb));

    let swaps_before = driver.stats().swaps;
    assert!(registry.play_screenshot_animation());
    assert!(
        driver.stats().swaps > swaps_before + 1,
        "the effect presents frames and then reposts"
    );
    assert_eq!(registry.last_posted_color_buffer(), cb);
    assert_eq!(
        driver.live_images(),
        1,
        "effect textures are released, only the color buffer remains"
    );
}

// ============================================================================
// Data plane
// ============================================================================

#[test]
fn update_color_buffer_fails_only_for_unknown_handles() {
    let (_driver, registry) = new_registry();
    let cb = registry.create_color_buffer(16, 16, PixelFormat::Rgba8);

    let pixels = vec![0u8; 8 * 8 * 4];
    assert!(registry.update_color_buffer(cb, 4, 4, 8, 8, PixelFormat::Rgba8, &pixels));
    assert!(!registry.update_color_buffer(cb + 1, 4, 4, 8, 8, PixelFormat::Rgba8, &pixels));
}

#[test]
fn flush_copies_the_surface_into_the_attached_buffer() {
    let (_driver, registry) = new_registry();
    let cb = registry.create_color_buffer(32, 32, PixelFormat::Rgba8);
    let surface = registry.create_window_surface(CONFIG, 32, 32);

    assert!(registry.set_window_surface_color_buffer(surface, cb));
    assert!(registry.flush_window_surface_color_buffer(surface));
    assert!(!registry.flush_window_surface_color_buffer(surface + 99));
}

#[test]
fn colorbuffer_texture_bind_needs_a_current_context() {
    let (driver, registry) = new_registry();
    let cb = registry.create_color_buffer(16, 16, PixelFormat::Rgba8);

    assert!(
        !registry.bind_color_buffer_to_texture(cb),
        "no context is bound on this thread"
    );

    let ctx = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let surface = registry.create_window_surface(CONFIG, 16, 16);
    assert!(registry.bind_context(ctx, surface, surface));

    assert!(registry.bind_color_buffer_to_texture(cb));
    assert!(driver.bound_texture().is_some());
    assert!(registry.bind_color_buffer_to_renderbuffer(cb));
    assert!(driver.bound_renderbuffer().is_some());
}
