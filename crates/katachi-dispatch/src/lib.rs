//! Component rendering and staged dispatch
//!
//! A component is parsed into a workload plus traits, rendered into
//! resource manifests through the template evaluator, and applied in three
//! stages (Pre, Default, Post). Post-stage traits are deferred: they are
//! parked unrendered until the workload is healthy and its outputs
//! observable, then re-rendered against the live state.

pub mod dispatcher;
pub mod error;
pub mod health;
pub mod manifest;
pub mod renderer;

pub use dispatcher::{ComponentDispatcher, DispatchReport};
pub use error::DispatchError;
pub use health::{HealthCollector, HealthVerdict};
pub use manifest::{ComponentManifest, DeferredTrait, RenderedTrait, TraitState};
pub use renderer::{ComponentRenderer, RenderTarget};
