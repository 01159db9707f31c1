//! Registry Lifecycle Tests
//!
//! Tests for:
//! - Handle issuance: non-zero, unique across the context and surface tables
//! - ColorBuffer reference counting: creation implies one reference, open and
//!   close move the count, zero destroys exactly once
//! - ShareGroup lifetime: groups survive member destruction until the last
//!   member dies, then every owned object is destroyed through the decoder
//! - Context teardown: fallback surface laziness, current-state restoration,
//!   decoder-state release
//! - Finalization: dropping the registry releases every native object

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use glmux::{
    ApiVersion, ConfigId, DecoderApi, DecoderState, DecoderTable, GlDriver, HeadlessDriver,
    NoopDecoder, ObjectKind, PixelFormat, Registry, SubwindowHost,
};

const CONFIG: ConfigId = ConfigId(1);

fn new_registry() -> (Arc<HeadlessDriver>, Registry) {
    let driver = Arc::new(HeadlessDriver::new());
    let registry = Registry::new(
        Arc::clone(&driver) as Arc<dyn GlDriver>,
        Arc::clone(&driver) as Arc<dyn SubwindowHost>,
        DecoderTable::uniform(Arc::new(NoopDecoder::new())),
        640,
        480,
        None,
    )
    .expect("registry should initialize against the headless driver");
    (driver, registry)
}

/// Decoder that records every destroyed object and released context state.
#[derive(Default)]
struct RecordingDecoder {
    next_state: AtomicU64,
    destroyed: Mutex<Vec<(ObjectKind, u32)>>,
    released: Mutex<Vec<DecoderState>>,
}

impl DecoderApi for RecordingDecoder {
    fn create_context_state(&self) -> DecoderState {
        DecoderState(self.next_state.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn release_context_state(&self, state: DecoderState) {
        self.released.lock().push(state);
    }

    fn destroy_object(&self, kind: ObjectKind, name: u32) {
        self.destroyed.lock().push((kind, name));
    }
}

fn new_registry_with_decoder() -> (Arc<HeadlessDriver>, Arc<RecordingDecoder>, Registry) {
    let driver = Arc::new(HeadlessDriver::new());
    let decoder = Arc::new(RecordingDecoder::default());
    let registry = Registry::new(
        Arc::clone(&driver) as Arc<dyn GlDriver>,
        Arc::clone(&driver) as Arc<dyn SubwindowHost>,
        DecoderTable::uniform(Arc::clone(&decoder) as Arc<dyn DecoderApi>),
        640,
        480,
        None,
    )
    .expect("registry should initialize");
    (driver, decoder, registry)
}

// ============================================================================
// Handle issuance
// ============================================================================

#[test]
fn handles_are_nonzero_and_unique_across_tables() {
    let (_driver, registry) = new_registry();

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(registry.create_render_context(CONFIG, 0, ApiVersion::Legacy));
        handles.push(registry.create_window_surface(CONFIG, 64, 64));
    }
    // destroy a few and keep creating; dead handles may not collide with
    // live ones
    registry.destroy_render_context(handles[0]);
    registry.destroy_window_surface(handles[3]);
    for _ in 0..4 {
        handles.push(registry.create_render_context(CONFIG, 0, ApiVersion::Legacy));
        handles.push(registry.create_window_surface(CONFIG, 32, 32));
    }

    for &h in &handles {
        assert_ne!(h, 0, "0 must never be issued as a handle");
    }
    let mut sorted = handles.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), handles.len(), "handles must be unique");
}

#[test]
fn colorbuffers_share_the_numbering_space() {
    let (_driver, registry) = new_registry();

    let ctx = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let cb = registry.create_color_buffer(16, 16, PixelFormat::Rgba8);
    let surface = registry.create_window_surface(CONFIG, 16, 16);

    assert_ne!(ctx, 0);
    assert_ne!(cb, 0);
    assert_ne!(surface, 0);
    assert_ne!(ctx, cb);
    assert_ne!(cb, surface);
}

#[test]
fn create_with_unknown_config_fails() {
    let (_driver, registry) = new_registry();

    assert_eq!(
        registry.create_render_context(ConfigId(999), 0, ApiVersion::Legacy),
        0
    );
    assert_eq!(registry.create_window_surface(ConfigId(999), 64, 64), 0);
    assert_eq!(registry.context_count(), 0);
    assert_eq!(registry.surface_count(), 0);
}

#[test]
fn create_with_stale_share_handle_fails() {
    let (_driver, registry) = new_registry();

    assert_eq!(
        registry.create_render_context(CONFIG, 42, ApiVersion::Legacy),
        0,
        "an unknown share handle must fail creation"
    );

    let parent = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    registry.destroy_render_context(parent);
    assert_eq!(
        registry.create_render_context(CONFIG, parent, ApiVersion::Legacy),
        0,
        "a destroyed share handle must fail creation"
    );
}

// ============================================================================
// ColorBuffer reference counting
// ============================================================================

#[test]
fn colorbuffer_refcount_lifecycle() {
    let (_driver, registry) = new_registry();

    let cb = registry.create_color_buffer(64, 64, PixelFormat::Rgba8);
    assert_ne!(cb, 0);
    assert_eq!(registry.color_buffer_ref_count(cb), Some(1));

    registry.open_color_buffer(cb);
    assert_eq!(registry.color_buffer_ref_count(cb), Some(2));

    registry.close_color_buffer(cb);
    assert_eq!(registry.color_buffer_ref_count(cb), Some(1));

    registry.close_color_buffer(cb);
    assert_eq!(
        registry.color_buffer_ref_count(cb),
        None,
        "the buffer is destroyed exactly when the count reaches zero"
    );
    assert_eq!(registry.color_buffer_count(), 0);

    // a third close on the dead handle is a silent no-op
    registry.close_color_buffer(cb);
}

#[test]
fn open_of_bad_handle_is_ignored() {
    let (_driver, registry) = new_registry();
    registry.open_color_buffer(1234);
    assert_eq!(registry.color_buffer_count(), 0);
}

#[test]
fn attached_surface_keeps_storage_alive_after_close() {
    let (driver, registry) = new_registry();

    let cb = registry.create_color_buffer(32, 32, PixelFormat::Rgba8);
    let surface = registry.create_window_surface(CONFIG, 32, 32);
    assert!(registry.set_window_surface_color_buffer(surface, cb));
    assert_eq!(driver.live_images(), 1);

    registry.close_color_buffer(cb);
    assert_eq!(registry.color_buffer_count(), 0, "table entry must be gone");
    assert_eq!(
        driver.live_images(),
        1,
        "the attached surface still borrows the storage"
    );

    registry.destroy_window_surface(surface);
    assert_eq!(driver.live_images(), 0, "last borrow released the storage");
}

#[test]
fn many_surfaces_may_share_one_colorbuffer() {
    let (_driver, registry) = new_registry();

    let cb = registry.create_color_buffer(16, 16, PixelFormat::Rgba8);
    let s1 = registry.create_window_surface(CONFIG, 16, 16);
    let s2 = registry.create_window_surface(CONFIG, 16, 16);

    assert!(registry.set_window_surface_color_buffer(s1, cb));
    assert!(registry.set_window_surface_color_buffer(s2, cb));
    // the attachments are borrows, not client references
    assert_eq!(registry.color_buffer_ref_count(cb), Some(1));
}

// ============================================================================
// ShareGroup lifetime & context teardown
// ============================================================================

#[test]
fn share_group_survives_until_last_member_dies() {
    let (_driver, decoder, registry) = new_registry_with_decoder();

    let first = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let second = registry.create_render_context(CONFIG, first, ApiVersion::Legacy);
    assert_ne!(second, 0, "shared creation against a live parent must work");

    {
        let group = registry
            .context_share_group(first)
            .expect("live context has a group");
        group.register_object(ObjectKind::Texture, 1, 101);
        group.register_object(ObjectKind::Buffer, 2, 202);
    }

    registry.destroy_render_context(first);
    assert!(
        decoder.destroyed.lock().is_empty(),
        "objects must survive while a member context lives"
    );

    let group = registry
        .context_share_group(second)
        .expect("second member still resolves the group");
    assert_eq!(group.global_name(ObjectKind::Texture, 1), Some(101));
    assert_eq!(group.object_count(), 2);
    drop(group);

    registry.destroy_render_context(second);
    let mut destroyed = decoder.destroyed.lock().clone();
    destroyed.sort_unstable_by_key(|(_, name)| *name);
    assert_eq!(
        destroyed,
        vec![(ObjectKind::Texture, 101), (ObjectKind::Buffer, 202)],
        "last detach destroys each owned object exactly once"
    );
    assert_eq!(registry.share_group_entries(), 0, "the group itself is gone");
}

#[test]
fn unshared_contexts_get_independent_groups() {
    let (_driver, registry) = new_registry();

    let a = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let b = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);

    let group_a = registry.context_share_group(a).expect("group for a");
    let group_b = registry.context_share_group(b).expect("group for b");
    group_a.register_object(ObjectKind::Texture, 7, 700);
    assert_eq!(
        group_b.global_name(ObjectKind::Texture, 7),
        None,
        "names must not leak between unrelated groups"
    );
    assert_ne!(group_a.key(), group_b.key());
}

#[test]
fn fallback_surface_is_created_lazily_and_only_once() {
    let (driver, registry) = new_registry();

    let surfaces_after_init = driver.stats().surfaces_created;

    let a = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let b = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    assert_eq!(
        driver.stats().surfaces_created,
        surfaces_after_init,
        "context creation must not allocate surfaces"
    );

    registry.destroy_render_context(a);
    assert_eq!(
        driver.stats().surfaces_created,
        surfaces_after_init + 1,
        "first teardown creates the fallback surface"
    );

    registry.destroy_render_context(b);
    assert_eq!(
        driver.stats().surfaces_created,
        surfaces_after_init + 1,
        "later teardowns reuse it"
    );
}

#[test]
fn teardown_restores_the_previous_current_state() {
    let (driver, registry) = new_registry();

    let ctx = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let surface = registry.create_window_surface(CONFIG, 64, 64);
    assert!(registry.bind_context(ctx, surface, surface));
    let before = driver.current();

    let doomed = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    registry.destroy_render_context(doomed);

    assert_eq!(
        driver.current(),
        before,
        "destroying an unrelated context must not disturb the current binding"
    );
}

#[test]
fn teardown_releases_decoder_state() {
    let (_driver, decoder, registry) = new_registry_with_decoder();

    let ctx = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    assert!(decoder.released.lock().is_empty());

    registry.destroy_render_context(ctx);
    assert_eq!(
        decoder.released.lock().len(),
        1,
        "each destroyed context releases its decoder state"
    );
}

#[test]
fn bound_context_outlives_its_table_entry() {
    let (driver, registry) = new_registry();

    let ctx = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let surface = registry.create_window_surface(CONFIG, 64, 64);
    assert!(registry.bind_context(ctx, surface, surface));

    let contexts_before = driver.stats().contexts_destroyed;
    registry.destroy_render_context(ctx);
    assert_eq!(registry.context_count(), 0, "the handle dies immediately");
    assert_eq!(
        driver.stats().contexts_destroyed,
        contexts_before,
        "the native context lives while this thread still has it bound"
    );

    assert!(registry.bind_context(0, 0, 0), "unbind releases the context");
    assert_eq!(
        driver.stats().contexts_destroyed,
        contexts_before + 1,
        "teardown ran once the binding let go"
    );
}

// ============================================================================
// Finalization
// ============================================================================

#[test]
fn dropping_the_registry_releases_every_native_object() {
    let (driver, registry) = new_registry();

    let ctx = registry.create_render_context(CONFIG, 0, ApiVersion::Legacy);
    let _shared = registry.create_render_context(CONFIG, ctx, ApiVersion::Legacy);
    let _surface = registry.create_window_surface(CONFIG, 64, 64);
    let _cb = registry.create_color_buffer(64, 64, PixelFormat::Rgba8);

    drop(registry);

    assert_eq!(driver.live_contexts(), 0, "all native contexts released");
    assert_eq!(driver.live_surfaces(), 0, "all native surfaces released");
    assert_eq!(driver.live_images(), 0, "all native images released");
}
