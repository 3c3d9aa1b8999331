//! Label and unit compiler for podlift
//!
//! Pure transformations from declarative route/unit descriptors into the
//! reverse-proxy label list and the quadlet `.container` unit text.

pub mod labels;
pub mod models;
pub mod unit;

pub use labels::{compile_labels, middleware_chain, Middleware};
pub use models::{CompiledUnit, RateLimit, RouteDescriptor, UnitDescriptor};
pub use unit::{absolutize, absolutize_volume, render_unit, RenderContext};
