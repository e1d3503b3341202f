//! The selection pipeline: one idea in, captioned templates or a single
//! user-facing failure out.
//!
//! ```text
//! retrieve ─▶ build request ─▶ primary (structured) ─┬─▶ Done(ok)
//!                                  │ failure / 0 resolved
//!                                  ▼                   │
//!                              fallback (free text) ───┴─▶ Done(ok | failure)
//! ```
//!
//! The request is built once; both attempts see the same ordinals and the
//! same instruction text.

pub mod failure;
pub mod pipeline;

pub use failure::PipelineFailure;
pub use pipeline::{SelectionOutcome, SelectionPipeline};
