//! Decoder Capability Interface
//!
//! The command decoders (one per client API version) live outside this
//! crate; the registry only needs two things from them: a per-context state
//! token to activate on bind, and the ability to destroy a client-named
//! object when a share group dies. Both are exposed through [`DecoderApi`],
//! dispatched per [`ApiVersion`] by a [`DecoderTable`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Client API generation a context was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    /// Fixed-function era API.
    Legacy,
    /// Shader era API.
    Modern,
}

/// Kinds of client-named objects a share group can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Texture,
    Buffer,
    Program,
    Shader,
    Renderbuffer,
    Framebuffer,
}

/// Opaque per-context decoder state token.
///
/// Minted by [`DecoderApi::create_context_state`], activated for the calling
/// thread on bind, and released once the owning context is torn down. The
/// registry never looks inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoderState(pub u64);

/// Capabilities the registry requires from a decoder implementation.
pub trait DecoderApi: Send + Sync {
    /// Creates the decoder-side state for a newly created context.
    fn create_context_state(&self) -> DecoderState;

    /// Releases decoder-side state once its context is destroyed.
    fn release_context_state(&self, state: DecoderState);

    /// Destroys one client-named object owned by a dying share group.
    ///
    /// Called with a valid context current; implementations may issue native
    /// deletions directly.
    fn destroy_object(&self, kind: ObjectKind, name: u32);
}

/// Per-API-version decoder dispatch table.
#[derive(Clone)]
pub struct DecoderTable {
    legacy: Arc<dyn DecoderApi>,
    modern: Arc<dyn DecoderApi>,
}

impl DecoderTable {
    #[must_use]
    pub fn new(legacy: Arc<dyn DecoderApi>, modern: Arc<dyn DecoderApi>) -> Self {
        Self { legacy, modern }
    }

    /// Both versions served by the same decoder.
    #[must_use]
    pub fn uniform(decoder: Arc<dyn DecoderApi>) -> Self {
        Self {
            legacy: Arc::clone(&decoder),
            modern: decoder,
        }
    }

    #[must_use]
    pub fn get(&self, api: ApiVersion) -> &Arc<dyn DecoderApi> {
        match api {
            ApiVersion::Legacy => &self.legacy,
            ApiVersion::Modern => &self.modern,
        }
    }
}

/// Decoder stub for embeddings that run the registry without an attached
/// decoder (tests, headless tools). Mints unique tokens and destroys
/// nothing.
#[derive(Debug, Default)]
pub struct NoopDecoder {
    next_state: AtomicU64,
}

impl NoopDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecoderApi for NoopDecoder {
    fn create_context_state(&self) -> DecoderState {
        DecoderState(self.next_state.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn release_context_state(&self, _state: DecoderState) {}

    fn destroy_object(&self, _kind: ObjectKind, _name: u32) {}
}
