//! Template selection core: build a request from candidate templates, decode
//! what a model chose, and reconcile it back to real template records.
//!
//! Nothing in this crate performs I/O.

pub mod extract;
pub mod reconcile;
pub mod request;
pub mod response;
pub mod template;

pub use reconcile::{reconcile, DropReason, DroppedSelection, Reconciliation, ResolvedSelection};
pub use request::{IndexedTemplate, Ordinal, RequestError, SelectionRequest, DEFAULT_AUDIENCE};
pub use response::{ProtocolError, Selection, SelectionResponse};
pub use template::{Template, TemplateMode};
