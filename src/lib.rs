#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod range;
pub mod config;
pub mod decoder;
pub mod driver;
pub mod colorbuffer;
pub mod surface;
pub mod context;
pub mod registry;

pub use colorbuffer::ColorBuffer;
pub use config::{ApiSupport, ConfigId, DriverCaps, FbConfig, RegistryCaps, SurfaceKind};
pub use context::{RenderContext, ShareGroup};
pub use decoder::{ApiVersion, DecoderApi, DecoderState, DecoderTable, NoopDecoder, ObjectKind};
pub use driver::headless::HeadlessDriver;
pub use driver::{
    CurrentGuard, CurrentState, DrawParams, GlDriver, ImageRect, NativeContextId, NativeDrawable,
    NativeImageId, NativeSurfaceId, PixelFormat, SubwindowHost,
};
pub use errors::{DriverError, DriverResult, MuxError, Result};
pub use range::{Range, RangeList};
pub use registry::{Handle, PostCallback, PostedFrame, Registry};
pub use surface::{SurfaceBinding, WindowSurface};
