//! Session pipeline
//!
//! A pipeline is an ordered list of stages. Each stage receives the session
//! and a [`Next`] continuation, so it can act before the inner stages, after
//! them, or instead of them.
//!
//! # Overview
//!
//! - [`SessionMiddleware`]: the stage trait
//! - [`Next`]: continuation to the inner stages
//! - [`MiddlewareStack`]: ordered stages, usable as the listener's session handler
//! - [`pipeline`]: the default composition and its configuration
//! - [`builtins`]: the stages the default composition is made of

pub mod builtins;
pub mod pipeline;
pub mod stack;
pub mod traits;

pub use pipeline::{PipelineConfig, default_pipeline};
pub use stack::MiddlewareStack;
pub use traits::{Next, SessionMiddleware};
