use serde::Serialize;

use crate::request::{Ordinal, SelectionRequest};
use crate::response::SelectionResponse;
use crate::template::Template;

/// A model selection that survived reconciliation: a real template record
/// plus the captions the model wrote for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSelection {
    pub template: Template,
    pub captions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    #[serde(rename = "ordinal_not_found")]
    OrdinalNotFound,
}

/// Diagnostic for a selection the reconciler discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedSelection {
    pub ordinal: i64,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub resolved: Vec<ResolvedSelection>,
    pub dropped: Vec<DroppedSelection>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Resolve every selection's ordinal against the request that produced it.
///
/// Unknown ordinals are dropped and reported in [`Reconciliation::dropped`];
/// they never abort the whole response. Selection order is preserved.
pub fn reconcile(response: &SelectionResponse, request: &SelectionRequest) -> Reconciliation {
    let mut reconciliation = Reconciliation::default();

    for selection in &response.selections {
        let template = Ordinal::from_model(selection.template_ordinal).and_then(|o| request.lookup(o));

        match template {
            Some(template) => reconciliation.resolved.push(ResolvedSelection {
                template: template.clone(),
                captions: selection.captions.clone(),
            }),
            None => reconciliation.dropped.push(DroppedSelection {
                ordinal: selection.template_ordinal,
                reason: DropReason::OrdinalNotFound,
            }),
        }
    }

    reconciliation
}
