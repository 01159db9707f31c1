//! Render Contexts & Share Groups
//!
//! A [`RenderContext`] owns one native context. Every context created with a
//! share parent joins the parent's [`ShareGroup`]: the set of client-named
//! objects (textures, buffers, programs, ...) visible to the whole family.
//! The group dies with its last member, at which point every owned object is
//! deleted through the decoder's destroy capability.
//!
//! Teardown ordering is the delicate part: object deletion is only
//! well-defined while a valid context is current, so the dying context is
//! first made current on a lazily created 1×1 fallback surface, the group is
//! detached (and destroyed if this was the last member), and only then is
//! the caller's previous current state restored and the native context
//! released. Every step is best-effort; teardown always completes.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::ConfigId;
use crate::decoder::{ApiVersion, DecoderApi, DecoderState, ObjectKind};
use crate::driver::NativeContextId;
use crate::errors::DriverResult;
use crate::registry::RegistryShared;

/// Client object names shared by a family of contexts.
///
/// Keyed in the group table by the native-context id used to create it.
/// Membership is the `Arc` strong count, mutated only under the registry
/// lock.
pub struct ShareGroup {
    key: NativeContextId,
    api: ApiVersion,
    decoder: Arc<dyn DecoderApi>,
    objects: Mutex<FxHashMap<(ObjectKind, u32), u32>>,
}

impl ShareGroup {
    fn new(key: NativeContextId, api: ApiVersion, decoder: Arc<dyn DecoderApi>) -> Arc<Self> {
        Arc::new(Self {
            key,
            api,
            decoder,
            objects: Mutex::new(FxHashMap::default()),
        })
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> NativeContextId {
        self.key
    }

    #[inline]
    #[must_use]
    pub fn api(&self) -> ApiVersion {
        self.api
    }

    /// Maps a client-visible object name to its native identity.
    pub fn register_object(&self, kind: ObjectKind, local_name: u32, global_name: u32) {
        self.objects.lock().insert((kind, local_name), global_name);
    }

    /// Resolves a client-visible name within the group.
    #[must_use]
    pub fn global_name(&self, kind: ObjectKind, local_name: u32) -> Option<u32> {
        self.objects.lock().get(&(kind, local_name)).copied()
    }

    /// Unregisters a client-visible name, returning the native identity the
    /// caller is now responsible for deleting.
    pub fn remove_object(&self, kind: ObjectKind, local_name: u32) -> Option<u32> {
        self.objects.lock().remove(&(kind, local_name))
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Destroys every owned object through the decoder, draining the map so
    /// a later call finds nothing left to do.
    pub(crate) fn destroy_objects(&self) {
        let objects = std::mem::take(&mut *self.objects.lock());
        for ((kind, _), global_name) in objects {
            self.decoder.destroy_object(kind, global_name);
        }
    }
}

impl Drop for ShareGroup {
    fn drop(&mut self) {
        // already drained when the last member context detached; this only
        // fires for groups that escaped through an external Arc
        self.destroy_objects();
    }
}

/// Registry-wide table of live share groups, one entry per member context.
#[derive(Default)]
pub(crate) struct ShareGroupTable {
    groups: FxHashMap<NativeContextId, Weak<ShareGroup>>,
}

impl ShareGroupTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh group keyed by the creating context.
    pub(crate) fn create(
        &mut self,
        key: NativeContextId,
        api: ApiVersion,
        decoder: Arc<dyn DecoderApi>,
    ) -> Arc<ShareGroup> {
        let group = ShareGroup::new(key, api, decoder);
        self.groups.insert(key, Arc::downgrade(&group));
        group
    }

    /// Joins `member` to the group of `parent`, if that group is still
    /// alive.
    pub(crate) fn attach(
        &mut self,
        member: NativeContextId,
        parent: NativeContextId,
    ) -> Option<Arc<ShareGroup>> {
        let group = self.groups.get(&parent).and_then(Weak::upgrade)?;
        self.groups.insert(member, Arc::downgrade(&group));
        Some(group)
    }

    /// Drops entries whose group has died.
    pub(crate) fn prune(&mut self) {
        self.groups.retain(|_, group| group.strong_count() > 0);
    }

    /// Number of live entries (one per member context).
    pub(crate) fn live_entries(&self) -> usize {
        self.groups
            .values()
            .filter(|group| group.strong_count() > 0)
            .count()
    }
}

/// One client rendering context.
pub struct RenderContext {
    shared: Arc<RegistryShared>,
    decoder: Arc<dyn DecoderApi>,
    native: NativeContextId,
    config: ConfigId,
    api: ApiVersion,
    decoder_state: DecoderState,
    /// `None` only while teardown is in flight.
    share_group: Option<Arc<ShareGroup>>,
}

impl RenderContext {
    /// Creates the native context and attaches it to its share family.
    pub(crate) fn create(
        shared: Arc<RegistryShared>,
        decoder: Arc<dyn DecoderApi>,
        groups: &mut ShareGroupTable,
        config: ConfigId,
        share_with: Option<&RenderContext>,
        api: ApiVersion,
    ) -> DriverResult<Arc<Self>> {
        let native = shared
            .driver
            .create_context(config, share_with.map(|c| c.native), api)?;
        let share_group = match share_with {
            Some(parent) => groups
                .attach(native, parent.native)
                .unwrap_or_else(|| groups.create(native, api, Arc::clone(&decoder))),
            None => groups.create(native, api, Arc::clone(&decoder)),
        };
        let decoder_state = decoder.create_context_state();
        Ok(Arc::new(Self {
            shared,
            decoder,
            native,
            config,
            api,
            decoder_state,
            share_group: Some(share_group),
        }))
    }

    #[inline]
    #[must_use]
    pub fn native(&self) -> NativeContextId {
        self.native
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> ConfigId {
        self.config
    }

    #[inline]
    #[must_use]
    pub fn api(&self) -> ApiVersion {
        self.api
    }

    #[inline]
    #[must_use]
    pub fn decoder_state(&self) -> DecoderState {
        self.decoder_state
    }

    /// The context's share group (`None` only mid-teardown).
    #[must_use]
    pub fn share_group(&self) -> Option<&Arc<ShareGroup>> {
        self.share_group.as_ref()
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        let driver = self.shared.driver.as_ref();

        // snapshot whatever is current right now; it may belong to an
        // unrelated thread's binding
        let saved = driver.current();

        match self.shared.fallback_surface(self.api) {
            Some(fallback) => {
                if let Err(err) =
                    driver.make_current(Some(fallback), Some(fallback), Some(self.native))
                {
                    log::warn!("could not make dying context current for teardown: {err}");
                }
            }
            None => {
                log::warn!("no fallback surface; share objects deleted without a current context");
            }
        }

        // detach from the share family; the last member destroys the
        // group's objects while the fallback binding is still in effect
        if let Some(group) = self.share_group.take() {
            if Arc::strong_count(&group) == 1 {
                group.destroy_objects();
            }
        }

        if let Err(err) = driver.make_current(saved.draw, saved.read, saved.context) {
            log::warn!("failed to restore current state after context teardown: {err}");
        }

        if let Err(err) = driver.destroy_context(self.native) {
            log::warn!("failed to release native context: {err}");
        }

        self.decoder.release_context_state(self.decoder_state);
    }
}
