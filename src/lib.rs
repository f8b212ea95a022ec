#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! A hardware-plane allocation engine for DRM/KMS atomic modesetting.
//!
//! A compositor hands this crate a [`device::Device`] built on top of its own
//! [`backend::Backend`] (the ioctl boundary), describes its outputs and the
//! client-visible layers it would like shown on each, and calls
//! [`device::Device::apply`]. The engine searches for a mapping of layers
//! onto the device's hardware planes that the kernel will actually accept,
//! falling back to the output's designated composition layer for whatever
//! doesn't fit, and stages the result into an [`request::AtomicRequest`] for
//! the caller to commit for real.
//!
//! ## Structure of the crate
//!
//! [`device`] owns the top-level handle: planes, CRTCs and outputs, and the
//! [`device::Device::apply`] entry point that ties the rest of the modules
//! together. [`output`] and [`layer`] hold the client-facing data model.
//! [`allocator`] is the recursive search itself; [`zorder`] is the stacking
//! constraint it enforces while searching; [`reuse`] is the fast path that
//! skips searching whenever nothing harmful changed; [`applier`] stages a
//! chosen layer onto a plane's properties; [`priority`] tracks per-layer
//! change frequency across commits. [`backend`] defines the trait a real DRM
//! backend implements, and [`property`]/[`request`]/[`collections`] are the
//! supporting property, atomic-request and arena types.
//!
//! ## Logging
//!
//! This crate emits structured diagnostics via `tracing`: an
//! `info_span!("apply", ...)` wraps every [`device::Device::apply`] call, and
//! an `info_span!("allocate", ...)` wraps the search itself whenever the
//! reuse guard declines to short-circuit it. Enable a subscriber (e.g.
//! `tracing-subscriber`'s `EnvFilter`) to see them.

pub mod allocator;
pub mod applier;
pub mod backend;
pub mod collections;
pub mod device;
pub mod error;
pub mod layer;
pub mod output;
pub mod plane;
pub mod priority;
pub mod property;
pub mod request;
pub mod zorder;

pub(crate) mod reuse;

pub use error::Error;
