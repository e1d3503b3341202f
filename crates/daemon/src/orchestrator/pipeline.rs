use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use meme_engine::{reconcile, ResolvedSelection, SelectionRequest, TemplateMode};

use crate::llm::{CaptionProvider, ModelChoice};
use crate::orchestrator::failure::{classify, AttemptFailure, PipelineFailure};
use crate::retrieval::CandidateRetriever;

#[derive(Debug, Clone, Serialize)]
pub struct SelectionOutcome {
    pub request_id: Uuid,
    /// Name of the provider whose answer was used
    pub provider: String,
    pub selections: Vec<ResolvedSelection>,
}

/// Retrieval, request building, the primary structured attempt and the
/// free-text fallback, in that order.
pub struct SelectionPipeline {
    retriever: Arc<dyn CandidateRetriever>,
    primaries: HashMap<ModelChoice, Arc<dyn CaptionProvider>>,
    fallback: Option<Arc<dyn CaptionProvider>>,
}

impl SelectionPipeline {
    pub fn new(retriever: Arc<dyn CandidateRetriever>) -> Self {
        SelectionPipeline {
            retriever,
            primaries: HashMap::new(),
            fallback: None,
        }
    }

    pub fn with_primary(mut self, choice: ModelChoice, provider: Arc<dyn CaptionProvider>) -> Self {
        self.primaries.insert(choice, provider);
        self
    }

    /// The fallback should read free text; a structured provider here
    /// only repeats the primary's failure modes.
    pub fn with_fallback(mut self, provider: Arc<dyn CaptionProvider>) -> Self {
        if provider.is_structured() {
            warn!(provider = provider.name(), "fallback provider is structured, not free-text");
        }
        self.fallback = Some(provider);
        self
    }

    /// Which provider slots are filled, for the startup log.
    pub fn describe(&self) -> String {
        let mut primaries: Vec<&str> = self.primaries.keys().map(ModelChoice::as_str).collect();
        primaries.sort_unstable();
        format!(
            "primaries=[{}] fallback={}{}",
            primaries.join(","),
            self.fallback.as_ref().map(|p| p.name()).unwrap_or("none"),
            match &self.fallback {
                Some(p) if p.is_structured() => " (structured)",
                _ => "",
            }
        )
    }

    /// Turn one idea into captioned templates.
    ///
    /// `model_id` overrides the primary provider's configured model only;
    /// the fallback always uses its own.
    pub async fn select_templates_for_idea(
        &self,
        prompt_text: &str,
        audience: Option<&str>,
        mode: TemplateMode,
        model_choice: ModelChoice,
        model_id: Option<&str>,
    ) -> Result<SelectionOutcome, PipelineFailure> {
        let request_id = Uuid::new_v4();

        let prompt_text = prompt_text.trim();
        if prompt_text.is_empty() {
            return Err(PipelineFailure::InvalidPrompt);
        }

        let templates = self.retriever.retrieve(prompt_text, mode).await.map_err(|e| {
            warn!(%request_id, error = %e, "candidate retrieval failed");
            PipelineFailure::Transport {
                detail: format!("candidate retrieval failed: {}", e),
            }
        })?;

        let request = SelectionRequest::build(prompt_text, audience, templates, mode).map_err(|e| {
            info!(%request_id, mode = %mode, reason = %e, "selection request rejected");
            PipelineFailure::from(e)
        })?;

        info!(
            %request_id,
            mode = %request.mode(),
            model = %model_choice,
            prompt_chars = request.prompt_text().chars().count(),
            candidates = request.candidates().len(),
            "selection request built"
        );

        let mut failures = Vec::with_capacity(2);

        match self.primaries.get(&model_choice) {
            Some(provider) => match self.attempt(request_id, provider.as_ref(), &request, model_id).await {
                Ok(outcome) => return Ok(outcome),
                Err(failure) => failures.push(failure),
            },
            None => {
                warn!(%request_id, model = %model_choice, "primary provider not configured");
                failures.push(AttemptFailure::Disabled);
            }
        }

        match &self.fallback {
            Some(provider) => {
                info!(%request_id, provider = provider.name(), "falling back to free-text provider");
                match self.attempt(request_id, provider.as_ref(), &request, None).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(failure) => failures.push(failure),
                }
            }
            None => failures.push(AttemptFailure::Disabled),
        }

        let failure = classify(&failures);
        warn!(%request_id, kind = failure.kind(), ?failures, "selection request failed");
        Err(failure)
    }

    async fn attempt(
        &self,
        request_id: Uuid,
        provider: &dyn CaptionProvider,
        request: &SelectionRequest,
        model_id: Option<&str>,
    ) -> Result<SelectionOutcome, AttemptFailure> {
        info!(
            %request_id,
            provider = provider.name(),
            structured = provider.is_structured(),
            "calling caption provider"
        );
        let response = provider.select(request, model_id).await.map_err(|e| {
            warn!(%request_id, provider = provider.name(), kind = e.kind(), error = %e, "provider attempt failed");
            AttemptFailure::Protocol(e)
        })?;

        let reconciliation = reconcile(&response, request);
        for dropped in &reconciliation.dropped {
            warn!(
                %request_id,
                provider = provider.name(),
                ordinal = dropped.ordinal,
                reason = ?dropped.reason,
                "dropped selection with unknown template ordinal"
            );
        }

        if reconciliation.is_empty() {
            warn!(%request_id, provider = provider.name(), "no selection matched a candidate");
            return Err(AttemptFailure::Unresolved);
        }

        info!(
            %request_id,
            provider = provider.name(),
            resolved = reconciliation.resolved.len(),
            dropped = reconciliation.dropped.len(),
            "selection succeeded"
        );

        Ok(SelectionOutcome {
            request_id,
            provider: provider.name().to_string(),
            selections: reconciliation.resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use meme_engine::{ProtocolError, Selection, SelectionResponse, Template};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedRetriever {
        templates: Vec<Template>,
        calls: AtomicUsize,
    }

    impl FixedRetriever {
        fn new(templates: Vec<Template>) -> Arc<Self> {
            Arc::new(FixedRetriever {
                templates,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl CandidateRetriever for FixedRetriever {
        async fn retrieve(&self, _prompt_text: &str, _mode: TemplateMode) -> Result<Vec<Template>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.templates.clone())
        }
    }

    /// Answers every call with the same scripted result and remembers what
    /// it was asked.
    struct ScriptedProvider {
        name: &'static str,
        reply: Result<SelectionResponse, ProtocolError>,
        seen: Mutex<Vec<(String, Vec<u32>, Option<String>)>>,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, reply: Result<SelectionResponse, ProtocolError>) -> Arc<Self> {
            Arc::new(ScriptedProvider {
                name,
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl CaptionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_structured(&self) -> bool {
            self.name != "fallback"
        }

        async fn select(
            &self,
            request: &SelectionRequest,
            model: Option<&str>,
        ) -> Result<SelectionResponse, ProtocolError> {
            let ordinals = request.candidates().iter().map(|c| c.ordinal.get()).collect();
            self.seen
                .lock()
                .unwrap()
                .push((request.instruction().to_string(), ordinals, model.map(str::to_string)));
            self.reply.clone()
        }
    }

    fn templates() -> Vec<Template> {
        vec![
            Template::new("Drake", "", "https://cdn.example/drake.mp4"),
            Template::new("Distracted Boyfriend", "", "https://cdn.example/boyfriend.mp4"),
            Template::new("Woman Yelling at Cat", "", "https://cdn.example/cat.mp4"),
        ]
    }

    fn answer(selections: Vec<(i64, Vec<&str>)>) -> Result<SelectionResponse, ProtocolError> {
        Ok(SelectionResponse {
            selections: selections
                .into_iter()
                .map(|(ordinal, captions)| Selection {
                    template_ordinal: ordinal,
                    captions: captions.into_iter().map(str::to_string).collect(),
                })
                .collect(),
        })
    }

    async fn run(pipeline: &SelectionPipeline) -> Result<SelectionOutcome, PipelineFailure> {
        pipeline
            .select_templates_for_idea("monday mornings", None, TemplateMode::Standard, ModelChoice::Claude, None)
            .await
    }

    #[tokio::test]
    async fn unknown_ordinal_is_dropped_and_the_rest_succeeds() {
        let primary = ScriptedProvider::new(
            "primary",
            answer(vec![(2, vec!["Me ignoring my alarm", "Bed > job"]), (5, vec!["ghost"])]),
        );
        let fallback = ScriptedProvider::new("fallback", Err(ProtocolError::transport("unused")));
        let pipeline = SelectionPipeline::new(FixedRetriever::new(templates()))
            .with_primary(ModelChoice::Claude, primary.clone())
            .with_fallback(fallback.clone());

        let outcome = run(&pipeline).await.unwrap();

        assert_eq!(outcome.provider, "primary");
        assert_eq!(outcome.selections.len(), 1);
        assert_eq!(outcome.selections[0].template.name, "Distracted Boyfriend");
        assert_eq!(outcome.selections[0].captions, vec!["Me ignoring my alarm", "Bed > job"]);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn fallback_sees_the_same_request_as_the_primary() {
        for primary_error in [
            ProtocolError::blocked("SAFETY"),
            ProtocolError::malformed("bad json"),
            ProtocolError::transport("timeout"),
        ] {
            let primary = ScriptedProvider::new("primary", Err(primary_error));
            let fallback = ScriptedProvider::new("fallback", answer(vec![(3, vec!["Me vs. Monday"])]));
            let pipeline = SelectionPipeline::new(FixedRetriever::new(templates()))
                .with_primary(ModelChoice::Claude, primary.clone())
                .with_fallback(fallback.clone());

            let outcome = run(&pipeline).await.unwrap();
            assert_eq!(outcome.provider, "fallback");
            assert_eq!(outcome.selections[0].template.name, "Woman Yelling at Cat");

            let primary_seen = primary.seen.lock().unwrap()[0].clone();
            let fallback_seen = fallback.seen.lock().unwrap()[0].clone();
            assert_eq!(primary_seen.0, fallback_seen.0);
            assert_eq!(primary_seen.1, vec![1, 2, 3]);
            assert_eq!(primary_seen.1, fallback_seen.1);
        }
    }

    #[tokio::test]
    async fn fully_unresolved_primary_triggers_fallback() {
        let primary = ScriptedProvider::new("primary", answer(vec![(9, vec!["nowhere"])]));
        let fallback = ScriptedProvider::new("fallback", answer(vec![(1, vec!["Sleep"]), (2, vec!["Coffee"])]));
        let pipeline = SelectionPipeline::new(FixedRetriever::new(templates()))
            .with_primary(ModelChoice::Claude, primary)
            .with_fallback(fallback.clone());

        let outcome = run(&pipeline).await.unwrap();
        assert_eq!(outcome.selections.len(), 2);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn zero_selections_everywhere_is_no_usable_selections() {
        let pipeline = SelectionPipeline::new(FixedRetriever::new(templates()))
            .with_primary(ModelChoice::Claude, ScriptedProvider::new("primary", Err(ProtocolError::Empty)))
            .with_fallback(ScriptedProvider::new("fallback", answer(vec![(7, vec!["x"])])));

        assert_eq!(run(&pipeline).await.unwrap_err(), PipelineFailure::NoUsableSelections);
    }

    #[tokio::test]
    async fn refusal_is_surfaced_even_if_the_fallback_times_out() {
        let pipeline = SelectionPipeline::new(FixedRetriever::new(templates()))
            .with_primary(
                ModelChoice::Claude,
                ScriptedProvider::new("primary", Err(ProtocolError::blocked("SAFETY"))),
            )
            .with_fallback(ScriptedProvider::new("fallback", Err(ProtocolError::transport("timeout"))));

        let failure = run(&pipeline).await.unwrap_err();
        assert_eq!(failure.kind(), "model_declined");
    }

    #[tokio::test]
    async fn transport_on_both_paths_is_transport() {
        let pipeline = SelectionPipeline::new(FixedRetriever::new(templates()))
            .with_primary(
                ModelChoice::Claude,
                ScriptedProvider::new("primary", Err(ProtocolError::transport("connection refused"))),
            )
            .with_fallback(ScriptedProvider::new("fallback", Err(ProtocolError::transport("timeout"))));

        let failure = run(&pipeline).await.unwrap_err();
        assert_eq!(
            failure,
            PipelineFailure::Transport {
                detail: "connection refused".to_string()
            }
        );
    }

    #[tokio::test]
    async fn no_candidates_never_calls_a_provider() {
        let primary = ScriptedProvider::new("primary", answer(vec![(1, vec!["x"])]));
        let fallback = ScriptedProvider::new("fallback", answer(vec![(1, vec!["x"])]));
        let pipeline = SelectionPipeline::new(FixedRetriever::new(Vec::new()))
            .with_primary(ModelChoice::Claude, primary.clone())
            .with_fallback(fallback.clone());

        assert_eq!(run(&pipeline).await.unwrap_err(), PipelineFailure::NoCandidates);
        assert_eq!(primary.calls() + fallback.calls(), 0);
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_before_retrieval() {
        let retriever = FixedRetriever::new(templates());
        let pipeline = SelectionPipeline::new(retriever.clone());

        let failure = pipeline
            .select_templates_for_idea("   ", Some("devs"), TemplateMode::Standard, ModelChoice::Claude, None)
            .await
            .unwrap_err();

        assert_eq!(failure, PipelineFailure::InvalidPrompt);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_choice_routes_to_its_primary_and_override_reaches_it() {
        let claude = ScriptedProvider::new("claude", answer(vec![(1, vec!["x"])]));
        let gemini = ScriptedProvider::new("gemini", answer(vec![(2, vec!["y"])]));
        let pipeline = SelectionPipeline::new(FixedRetriever::new(templates()))
            .with_primary(ModelChoice::Claude, claude.clone())
            .with_primary(ModelChoice::Gemini, gemini.clone());

        let outcome = pipeline
            .select_templates_for_idea(
                "monday mornings",
                None,
                TemplateMode::Standard,
                ModelChoice::Gemini,
                Some("gemini-exp"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.provider, "gemini");
        assert_eq!(claude.calls(), 0);
        assert_eq!(gemini.seen.lock().unwrap()[0].2.as_deref(), Some("gemini-exp"));
    }

    #[test]
    fn describe_flags_a_structured_fallback() {
        let free_text = SelectionPipeline::new(FixedRetriever::new(templates()))
            .with_primary(ModelChoice::Claude, ScriptedProvider::new("claude", answer(vec![])))
            .with_fallback(ScriptedProvider::new("fallback", answer(vec![])));
        assert_eq!(free_text.describe(), "primaries=[claude] fallback=fallback");

        let structured = SelectionPipeline::new(FixedRetriever::new(templates()))
            .with_fallback(ScriptedProvider::new("gemini", answer(vec![])));
        assert_eq!(structured.describe(), "primaries=[] fallback=gemini (structured)");
    }

    #[tokio::test]
    async fn missing_primary_goes_straight_to_fallback() {
        let fallback = ScriptedProvider::new("fallback", answer(vec![(2, vec!["y"])]));
        let pipeline = SelectionPipeline::new(FixedRetriever::new(templates())).with_fallback(fallback.clone());

        let outcome = run(&pipeline).await.unwrap();
        assert_eq!(outcome.provider, "fallback");
        assert_eq!(fallback.seen.lock().unwrap()[0].2, None);
    }
}
