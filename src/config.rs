//! Framebuffer Configurations & Capabilities
//!
//! Describes what the native driver can do: the list of framebuffer
//! configurations clients may create contexts/surfaces against, and the
//! capability record probed once at registry initialization.

use bitflags::bitflags;

use crate::decoder::ApiVersion;

/// Opaque identifier of a driver-provided framebuffer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigId(pub u32);

bitflags! {
    /// Surface kinds a configuration can back.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SurfaceKind: u32 {
        /// On-screen window surfaces.
        const WINDOW = 1 << 0;
        /// Off-screen pixel-buffer surfaces.
        const PBUFFER = 1 << 1;
    }
}

bitflags! {
    /// Client APIs a configuration is renderable with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ApiSupport: u32 {
        const LEGACY = 1 << 0;
        const MODERN = 1 << 1;
    }
}

impl ApiSupport {
    /// The flag corresponding to a concrete API version.
    #[must_use]
    pub fn from_version(api: ApiVersion) -> Self {
        match api {
            ApiVersion::Legacy => Self::LEGACY,
            ApiVersion::Modern => Self::MODERN,
        }
    }
}

/// One framebuffer configuration exposed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbConfig {
    pub id: ConfigId,
    pub red_bits: u8,
    pub green_bits: u8,
    pub blue_bits: u8,
    pub alpha_bits: u8,
    pub depth_bits: u8,
    pub stencil_bits: u8,
    pub surfaces: SurfaceKind,
    pub apis: ApiSupport,
}

/// Picks the first configuration renderable with `apis` and backing all of
/// `surfaces`.
#[must_use]
pub fn choose_config(
    configs: &[FbConfig],
    apis: ApiSupport,
    surfaces: SurfaceKind,
) -> Option<ConfigId> {
    configs
        .iter()
        .find(|c| c.apis.contains(apis) && c.surfaces.contains(surfaces))
        .map(|c| c.id)
}

/// Raw capabilities reported by the driver before any config filtering.
#[derive(Debug, Clone, Copy)]
pub struct DriverCaps {
    /// Native API version pair (major, minor).
    pub version: (u32, u32),
    /// Whether the modern client API is available at all.
    pub has_modern_api: bool,
    /// Whether color-buffer storage can be bound as a texture.
    pub has_image_texture_binding: bool,
    /// Whether color-buffer storage can be bound as a renderbuffer.
    pub has_image_renderbuffer_binding: bool,
}

/// Effective capabilities of an initialized registry.
///
/// Derived from [`DriverCaps`] after the config scan: the modern API is only
/// advertised when the driver supports it *and* at least one config is
/// modern-renderable.
#[derive(Debug, Clone, Copy)]
pub struct RegistryCaps {
    pub version: (u32, u32),
    pub has_modern_api: bool,
    pub has_image_texture_binding: bool,
    pub has_image_renderbuffer_binding: bool,
}
