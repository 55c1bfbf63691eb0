//! Turn orchestration pipeline.
//!
//! `TurnEngine` drives one conversational turn end to end:
//! - Answer from the response cache when possible
//! - Select APIs and load their specs for model context
//! - Call the model under rate limiting, with history compression
//! - Execute safe tool calls; suspend unsafe ones for human review
//! - Checkpoint the conversation state at every exit
//!
//! All collaborators are injected; the engine owns no I/O of its own. A
//! suspended turn is picked up later via [`TurnEngine::resume_turn`] with
//! the reviewer's decision.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::cache::ResponseCache;
use crate::checkpoint::CheckpointStore;
use crate::config::EngineConfig;
use crate::engine::compaction;
use crate::engine::errors::EngineError;
use crate::engine::machine::{
    self, route_model_reply, CacheRouting, ModelRouting, SelectionRouting, Stage,
};
use crate::engine::review::{self, ReviewAction, ToolCallDecision};
use crate::engine::types::{
    ApiSelection, ConversationState, ConversationStatus, Identity, Message, PendingReview,
    SuspensionPayload, ToolCall, TurnOutcome, TurnRequest,
};
use crate::gateway::{ApiCatalog, ApiSpec, ToolGateway};
use crate::model::{ModelClient, ModelError, ModelReply};
use crate::ratelimit::SharedRateLimiter;

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The turn orchestrator. One instance serves many users and conversations.
pub struct TurnEngine {
    model: Arc<dyn ModelClient>,
    gateway: Arc<dyn ToolGateway>,
    catalog: Arc<dyn ApiCatalog>,
    audit: Arc<dyn AuditSink>,
    cache: ResponseCache,
    limiter: SharedRateLimiter,
    checkpoints: CheckpointStore,
    config: EngineConfig,
}

impl TurnEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn ModelClient>,
        gateway: Arc<dyn ToolGateway>,
        catalog: Arc<dyn ApiCatalog>,
        audit: Arc<dyn AuditSink>,
        cache: ResponseCache,
        limiter: SharedRateLimiter,
        checkpoints: CheckpointStore,
        config: EngineConfig,
    ) -> Self {
        TurnEngine {
            model,
            gateway,
            catalog,
            audit,
            cache,
            limiter,
            checkpoints,
            config,
        }
    }

    // ─── Entry Points ───────────────────────────────────────────────────

    /// Run one turn over the supplied transcript.
    ///
    /// Returns the checkpointed state and, when the turn suspended for
    /// review, the suspension payload the reviewer needs.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError> {
        if request.messages.is_empty() {
            return Err(EngineError::validation("turn requires at least one message"));
        }
        if request.identity.user_id.trim().is_empty() {
            return Err(EngineError::validation("user id must not be empty"));
        }

        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::info!(
            conversation_id = %conversation_id,
            message_count = request.messages.len(),
            "turn started"
        );

        let mut state = ConversationState::new(request.messages.clone());
        match self.drive(&request, &mut state).await {
            Ok(suspension) => {
                self.checkpoints
                    .put(&request.identity.user_id, &conversation_id, &state)?;
                tracing::info!(
                    conversation_id = %conversation_id,
                    status = ?state.status,
                    "turn finished"
                );
                Ok(TurnOutcome {
                    conversation_id,
                    state,
                    suspension,
                })
            }
            Err(e) => {
                self.record_failure(&request.identity.user_id, &conversation_id, &mut state);
                Err(e)
            }
        }
    }

    /// Resume a suspended turn with the reviewer's decision.
    ///
    /// The decision is consumed exactly once: even when the resumed leg
    /// fails, the cleared review gate is checkpointed so the decision
    /// cannot be replayed.
    pub async fn resume_turn(
        &self,
        identity: &Identity,
        conversation_id: &str,
        decision: ToolCallDecision,
    ) -> Result<TurnOutcome, EngineError> {
        if identity.user_id.trim().is_empty() {
            return Err(EngineError::validation("user id must not be empty"));
        }

        let checkpoint = self
            .checkpoints
            .get(&identity.user_id, conversation_id)?
            .ok_or_else(|| EngineError::ConversationNotFound {
                conversation_id: conversation_id.to_string(),
            })?;
        let mut state = checkpoint.state;

        if state.status != ConversationStatus::Interrupted {
            return Err(EngineError::validation(
                "conversation is not awaiting review",
            ));
        }
        let pending = match state.pending_review.take() {
            Some(p) if p.call.id == decision.tool_call_id => p,
            Some(p) => {
                let id = decision.tool_call_id;
                state.pending_review = Some(p);
                return Err(EngineError::validation(format!(
                    "decision targets tool call '{id}' but it is not the one pending"
                )));
            }
            None => {
                return Err(EngineError::validation(
                    "conversation has no pending review",
                ))
            }
        };

        // Audit first, whatever happens next.
        let record = review::audit_record(identity, conversation_id, &pending.call, &decision.action);
        if let Err(e) = self.audit.log_decision(record) {
            tracing::warn!(error = %e, "audit sink failed, resuming anyway");
        }
        tracing::info!(
            conversation_id = %conversation_id,
            action = decision.action.label(),
            tool = %pending.call.name,
            "resuming turn"
        );

        state.status = ConversationStatus::Active;
        let specs = self.load_specs(&state.selected_apis).await;
        let (model, resource, context_window) = self.model_context(None);

        match decision.action {
            ReviewAction::Accept => {
                tracing::debug!(stage = ?Stage::CallApi, tool = %pending.call.name, "executing approved call");
                let result = self.execute_call(&pending.call).await;
                state.messages.push(Message::tool(result, &pending.call.id));
            }
            ReviewAction::Edit { arguments } => {
                let call = ToolCall {
                    arguments,
                    ..pending.call.clone()
                };
                tracing::debug!(stage = ?Stage::CallApi, tool = %call.name, "executing edited call");
                let result = self.execute_call(&call).await;
                state.messages.push(Message::tool(result, &call.id));
            }
            ReviewAction::Reject { message } => {
                state
                    .messages
                    .push(Message::tool("Tool call aborted by the user.", &pending.call.id));
                let ack = message
                    .unwrap_or_else(|| "I rejected that tool call. Do not run it.".to_string());
                state.messages.push(Message::human(ack));
            }
            ReviewAction::Feedback { message } => {
                state
                    .messages
                    .push(Message::tool(message, &pending.call.id));
            }
        }

        tracing::debug!(model = %model, "continuing suspended turn");
        match self
            .model_loop(identity, None, &resource, context_window, &specs, &mut state)
            .await
        {
            Ok(suspension) => {
                self.checkpoints
                    .put(&identity.user_id, conversation_id, &state)?;
                Ok(TurnOutcome {
                    conversation_id: conversation_id.to_string(),
                    state,
                    suspension,
                })
            }
            Err(e) => {
                self.record_failure(&identity.user_id, conversation_id, &mut state);
                Err(e)
            }
        }
    }

    // ─── Pipeline ───────────────────────────────────────────────────────

    async fn drive(
        &self,
        request: &TurnRequest,
        state: &mut ConversationState,
    ) -> Result<Option<SuspensionPayload>, EngineError> {
        let identity = &request.identity;
        let (model, resource, context_window) =
            self.model_context(request.options.model.as_deref());
        tracing::debug!(model = %model, resource = %resource, "resolved model profile");

        // ── CheckCache ──────────────────────────────────────────────────
        let cache_enabled = self.config.cache.enabled && !request.options.cache_disabled;
        if cache_enabled {
            tracing::debug!(stage = ?Stage::CheckCache, "entering stage");
            let lookup = self.cache.lookup(&identity.user_id, &request.messages);
            match machine::route_cache(lookup) {
                CacheRouting::Hit(hit) => {
                    tracing::info!(kind = ?hit.kind, "serving cached response");
                    state.messages.push(if hit.tool_calls.is_empty() {
                        Message::assistant(hit.response)
                    } else {
                        Message::assistant_with_calls(hit.response, hit.tool_calls)
                    });
                    state.cache_hit = true;
                    state.status = ConversationStatus::Completed;
                    return Ok(None);
                }
                CacheRouting::Miss => state.cache_miss = true,
            }
        }

        // ── LoadSummaries ───────────────────────────────────────────────
        tracing::debug!(stage = ?Stage::LoadSummaries, "entering stage");
        let summaries = match self.catalog.summaries().await {
            Ok(summaries) => summaries,
            Err(e) => {
                tracing::warn!(error = %e, "catalog unavailable, continuing without APIs");
                Vec::new()
            }
        };

        // ── SelectApis / LoadSpecs ──────────────────────────────────────
        let mut specs: Vec<ApiSpec> = Vec::new();
        if !summaries.is_empty() {
            tracing::debug!(stage = ?Stage::SelectApis, "entering stage");
            let selected = self
                .model
                .select_apis(&state.messages, &summaries)
                .await
                .map_err(map_model_error)?;
            match machine::route_selection(selected, &summaries) {
                SelectionRouting::LoadSpecs(selections) => {
                    tracing::debug!(
                        stage = ?Stage::LoadSpecs,
                        count = selections.len(),
                        "entering stage"
                    );
                    specs = self.load_specs(&selections).await;
                    state.selected_apis = selections;
                }
                SelectionRouting::SkipToModel => {}
            }
        }

        // ── CallModel / CallApi / HumanReview ───────────────────────────
        let cache_messages = cache_enabled.then_some(request.messages.as_slice());
        self.model_loop(
            identity,
            cache_messages,
            &resource,
            context_window,
            &specs,
            state,
        )
        .await
    }

    /// The CallModel / CallApi loop shared by fresh and resumed turns.
    ///
    /// `cache_messages` carries the original request transcript when the
    /// reply should be cached (fresh turns with caching on); resumed turns
    /// pass `None`.
    async fn model_loop(
        &self,
        identity: &Identity,
        cache_messages: Option<&[Message]>,
        resource: &str,
        context_window: u32,
        specs: &[ApiSpec],
        state: &mut ConversationState,
    ) -> Result<Option<SuspensionPayload>, EngineError> {
        let mut rounds: u32 = 0;

        loop {
            tracing::debug!(stage = ?Stage::CallModel, "entering stage");

            let transcript = std::mem::take(&mut state.messages);
            state.messages = compaction::compress_if_needed(
                self.model.as_ref(),
                transcript,
                specs,
                &self.config.compaction,
                context_window,
            )
            .await;

            self.throttle(resource).await?;

            let reply = self
                .model
                .invoke(&state.messages, specs)
                .await
                .map_err(map_model_error)?;

            if let Some(request_messages) = cache_messages {
                if let Err(e) = self.cache.store(
                    &identity.user_id,
                    request_messages,
                    &reply.content,
                    &reply.tool_calls,
                ) {
                    tracing::warn!(error = %e, "failed to cache model reply");
                }
            }

            state.messages.push(assistant_message(&reply));

            let routing = route_model_reply(&reply, self.config.tool_calls_enabled, |name| {
                self.gateway.safety(name)
            });
            match routing {
                ModelRouting::Complete => {
                    state.status = ConversationStatus::Completed;
                    return Ok(None);
                }
                ModelRouting::ToolsDisabled => {
                    tracing::info!("tool calls are disabled, ending turn");
                    state.status = ConversationStatus::Completed;
                    return Ok(None);
                }
                ModelRouting::UnknownTool { name } => {
                    tracing::warn!(tool = %name, "model requested an unknown tool, ending turn");
                    state.status = ConversationStatus::Completed;
                    return Ok(None);
                }
                ModelRouting::ExecuteSafe(call) => {
                    if rounds >= self.config.max_tool_rounds {
                        tracing::warn!(rounds, "tool round budget exhausted, ending turn");
                        state.status = ConversationStatus::Completed;
                        return Ok(None);
                    }
                    rounds += 1;
                    tracing::debug!(stage = ?Stage::CallApi, tool = %call.name, "entering stage");
                    let result = self.execute_call(&call).await;
                    state.messages.push(Message::tool(result, &call.id));
                }
                ModelRouting::Review(call) => {
                    tracing::info!(
                        stage = ?Stage::HumanReview,
                        tool = %call.name,
                        "suspending for review"
                    );
                    let pending = PendingReview {
                        question: review::review_question(&call),
                        call,
                        suspended_at: Utc::now(),
                    };
                    let payload = SuspensionPayload::from_pending(&pending);
                    state.pending_review = Some(pending);
                    state.status = ConversationStatus::Interrupted;
                    return Ok(Some(payload));
                }
            }
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    /// Resolve (model, rate-limit resource, context window) for a request.
    fn model_context(&self, requested: Option<&str>) -> (String, String, u32) {
        let model = self.config.resolve_model(requested).to_string();
        let profile = self.config.profile_for(&model);
        let resource = format!("{}/{model}", profile.platform);
        (model, resource, profile.context_window)
    }

    /// Load specs for the surviving selections; unresolvable ones are
    /// skipped.
    async fn load_specs(&self, selections: &[ApiSelection]) -> Vec<ApiSpec> {
        let mut specs = Vec::with_capacity(selections.len());
        for selection in selections {
            match self
                .catalog
                .load_spec(&selection.title, &selection.version)
                .await
            {
                Ok(Some(spec)) => specs.push(spec),
                Ok(None) => tracing::warn!(
                    title = %selection.title,
                    version = %selection.version,
                    "selected API has no loadable spec, skipping"
                ),
                Err(e) => tracing::warn!(
                    title = %selection.title,
                    error = %e,
                    "spec load failed, skipping"
                ),
            }
        }
        specs
    }

    /// Execute one approved call. Failures become the tool result text so
    /// the model can see and react to them.
    async fn execute_call(&self, call: &ToolCall) -> String {
        match self.gateway.execute(call).await {
            Ok(value) => value.to_string(),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool execution failed");
                format!("Tool execution failed: {e}")
            }
        }
    }

    /// Take one rate-limit token, waiting for refill if the bucket is dry.
    async fn throttle(&self, resource: &str) -> Result<(), EngineError> {
        let limiter = self.limiter.clone();
        let resource = resource.to_string();
        let granted = tokio::task::spawn_blocking(move || limiter.acquire(&resource, 1.0, true))
            .await
            .map_err(|e| EngineError::RateLimiterUnavailable {
                reason: e.to_string(),
            })??;
        if granted {
            Ok(())
        } else {
            Err(EngineError::RateLimiterUnavailable {
                reason: "rate limit acquisition denied".to_string(),
            })
        }
    }

    /// Best-effort Error checkpoint before a taxonomy error propagates.
    fn record_failure(&self, user_id: &str, conversation_id: &str, state: &mut ConversationState) {
        state.status = ConversationStatus::Error;
        if let Err(e) = self.checkpoints.put(user_id, conversation_id, state) {
            tracing::error!(error = %e, "failed to checkpoint errored turn");
        }
    }
}

fn assistant_message(reply: &ModelReply) -> Message {
    if reply.tool_calls.is_empty() {
        Message::assistant(reply.content.clone())
    } else {
        Message::assistant_with_calls(reply.content.clone(), reply.tool_calls.clone())
    }
}

fn map_model_error(e: ModelError) -> EngineError {
    match e {
        ModelError::Client { status, message } => {
            tracing::warn!(status = ?status, "model rejected the request");
            EngineError::ClientInvocation { message }
        }
        ModelError::Upstream { reason } => {
            tracing::error!(error = %reason, "model invocation failed");
            EngineError::Invocation
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::cache::MemoryBackend;
    use crate::gateway::{GatewayError, StaticCatalog, ToolSafety};
    use crate::model::SelectedApis;
    use crate::ratelimit::BucketConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // ── Stub collaborators ──────────────────────────────────────────────

    struct ScriptedModel {
        replies: Mutex<VecDeque<ModelReply>>,
        selection: SelectedApis,
        invocations: Mutex<Vec<(Vec<Message>, Vec<String>)>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<ModelReply>, selection: Vec<ApiSelection>) -> Arc<Self> {
            Arc::new(ScriptedModel {
                replies: Mutex::new(replies.into()),
                selection: SelectedApis { apis: selection },
                invocations: Mutex::new(Vec::new()),
            })
        }

        fn invocation_count(&self) -> usize {
            self.invocations.lock().unwrap().len()
        }

        fn invocation(&self, index: usize) -> (Vec<Message>, Vec<String>) {
            self.invocations.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn invoke(
            &self,
            messages: &[Message],
            api_specs: &[ApiSpec],
        ) -> Result<ModelReply, ModelError> {
            self.invocations.lock().unwrap().push((
                messages.to_vec(),
                api_specs.iter().map(|s| s.title.clone()).collect(),
            ));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(ModelError::Upstream {
                    reason: "model backend unreachable".to_string(),
                })
        }

        async fn select_apis(
            &self,
            _messages: &[Message],
            _summaries: &[crate::gateway::ApiSummary],
        ) -> Result<SelectedApis, ModelError> {
            Ok(self.selection.clone())
        }
    }

    struct RecordingGateway {
        executed: Mutex<Vec<ToolCall>>,
        fail_execution: bool,
    }

    impl RecordingGateway {
        fn new() -> Arc<Self> {
            Arc::new(RecordingGateway {
                executed: Mutex::new(Vec::new()),
                fail_execution: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(RecordingGateway {
                executed: Mutex::new(Vec::new()),
                fail_execution: true,
            })
        }

        fn executed(&self) -> Vec<ToolCall> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolGateway for RecordingGateway {
        async fn execute(&self, call: &ToolCall) -> Result<serde_json::Value, GatewayError> {
            self.executed.lock().unwrap().push(call.clone());
            if self.fail_execution {
                return Err(GatewayError::ExecutionFailed {
                    reason: "upstream returned 503".to_string(),
                });
            }
            Ok(serde_json::json!({"ok": true, "count": 2}))
        }

        fn safety(&self, tool_name: &str) -> Option<ToolSafety> {
            match tool_name {
                "list_http_requests" => Some(ToolSafety::Safe),
                "delete_http_requests" => Some(ToolSafety::Unsafe),
                _ => None,
            }
        }
    }

    // ── Harness ─────────────────────────────────────────────────────────

    struct Harness {
        engine: TurnEngine,
        model: Arc<ScriptedModel>,
        gateway: Arc<RecordingGateway>,
        audit: Arc<MemoryAuditSink>,
        _tmp: TempDir,
    }

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.models.insert(
            "gpt-4o".to_string(),
            crate::config::ModelProfile {
                platform: "openai".to_string(),
                context_window: 128_000,
            },
        );
        config.rate_limits.insert(
            "openai/gpt-4o".to_string(),
            BucketConfig {
                requests_per_second: 10_000.0,
                max_bucket_size: 10_000.0,
                check_every_n_seconds: 0.01,
            },
        );
        config
    }

    fn httpbin_spec() -> ApiSpec {
        ApiSpec {
            title: "httpbin".to_string(),
            version: "v1".to_string(),
            content: "openapi: 3.0.0\ninfo:\n  title: httpbin\npaths:\n  /requests: {}".to_string(),
        }
    }

    /// Opt-in log output for `cargo test -- --nocapture`; safe to call from
    /// every test because `try_init` ignores the second and later calls.
    fn init_test_tracing() {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("colloquy=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }

    fn harness_with(
        replies: Vec<ModelReply>,
        selection: Vec<ApiSelection>,
        gateway: Arc<RecordingGateway>,
        config: EngineConfig,
    ) -> Harness {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let model = ScriptedModel::new(replies, selection);
        let audit = Arc::new(MemoryAuditSink::new());
        let catalog = Arc::new(StaticCatalog::new(vec![httpbin_spec()]));
        let cache = ResponseCache::new(Box::new(MemoryBackend::new()), config.cache_options());
        let limiter = SharedRateLimiter::new(
            tmp.path().join("limits.db"),
            config.rate_limit_registry(),
        );
        let checkpoints = CheckpointStore::open_sqlite(":memory:").unwrap();

        let engine = TurnEngine::new(
            model.clone(),
            gateway.clone(),
            catalog,
            audit.clone(),
            cache,
            limiter,
            checkpoints,
            config,
        );
        Harness {
            engine,
            model,
            gateway,
            audit,
            _tmp: tmp,
        }
    }

    fn harness(replies: Vec<ModelReply>) -> Harness {
        harness_with(replies, vec![], RecordingGateway::new(), test_config())
    }

    fn delete_call() -> ToolCall {
        ToolCall {
            id: "call_del".to_string(),
            name: "delete_http_requests".to_string(),
            arguments: serde_json::json!({"older_than_days": 30}),
        }
    }

    fn reply_with(call: ToolCall) -> ModelReply {
        ModelReply {
            content: String::new(),
            tool_calls: vec![call],
        }
    }

    fn request(user: &str, text: &str) -> TurnRequest {
        TurnRequest::new(vec![Message::human(text)], Identity::new(user))
    }

    async fn suspended_turn(h: &Harness, user: &str) -> TurnOutcome {
        let outcome = h.engine.run_turn(request(user, "clear old requests")).await.unwrap();
        assert_eq!(outcome.state.status, ConversationStatus::Interrupted);
        outcome
    }

    // ── Plain turns ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_plain_turn_completes() {
        let h = harness(vec![ModelReply::text("You have 3 open orders.")]);

        let outcome = h.engine.run_turn(request("alice", "list my orders")).await.unwrap();

        assert_eq!(outcome.state.status, ConversationStatus::Completed);
        assert!(outcome.state.cache_miss);
        assert!(!outcome.state.cache_hit);
        assert!(outcome.suspension.is_none());
        assert!(!outcome.conversation_id.is_empty());
        let last = outcome.state.messages.last().unwrap();
        assert_eq!(last.content(), "You have 3 open orders.");

        // the final state was checkpointed
        let tip = h
            .engine
            .checkpoints
            .get("alice", &outcome.conversation_id)
            .unwrap()
            .unwrap();
        assert_eq!(tip.version, 1);
        assert_eq!(tip.state, outcome.state);
    }

    #[tokio::test]
    async fn test_empty_transcript_rejected() {
        let h = harness(vec![]);
        let result = h
            .engine
            .run_turn(TurnRequest::new(vec![], Identity::new("alice")))
            .await;
        assert!(matches!(result, Err(EngineError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_blank_user_rejected() {
        let h = harness(vec![]);
        let result = h.engine.run_turn(request("  ", "hello")).await;
        assert!(matches!(result, Err(EngineError::Validation { .. })));
    }

    // ── Tool execution ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_safe_tool_executes_and_feeds_result_back() {
        let safe_call = ToolCall {
            id: "call_list".to_string(),
            name: "list_http_requests".to_string(),
            arguments: serde_json::json!({"limit": 10}),
        };
        let h = harness(vec![
            reply_with(safe_call),
            ModelReply::text("There are 2 matching requests."),
        ]);

        let outcome = h.engine.run_turn(request("alice", "how many requests?")).await.unwrap();

        assert_eq!(outcome.state.status, ConversationStatus::Completed);
        assert_eq!(h.gateway.executed().len(), 1);
        assert_eq!(h.model.invocation_count(), 2);

        // the second invocation saw the tool result
        let (messages, _) = h.model.invocation(1);
        let tool_result = messages
            .iter()
            .find(|m| matches!(m, Message::Tool { .. }))
            .unwrap();
        assert!(tool_result.content().contains("\"count\":2"));
    }

    #[tokio::test]
    async fn test_gateway_failure_becomes_tool_result() {
        let safe_call = ToolCall {
            id: "call_list".to_string(),
            name: "list_http_requests".to_string(),
            arguments: serde_json::json!({}),
        };
        let h = harness_with(
            vec![reply_with(safe_call), ModelReply::text("Something broke.")],
            vec![],
            RecordingGateway::failing(),
            test_config(),
        );

        let outcome = h.engine.run_turn(request("alice", "list requests")).await.unwrap();

        assert_eq!(outcome.state.status, ConversationStatus::Completed);
        let (messages, _) = h.model.invocation(1);
        let tool_result = messages
            .iter()
            .find(|m| matches!(m, Message::Tool { .. }))
            .unwrap();
        assert!(tool_result.content().contains("Tool execution failed"));
    }

    #[tokio::test]
    async fn test_unknown_tool_ends_turn() {
        let mystery = ToolCall {
            id: "call_x".to_string(),
            name: "mystery_tool".to_string(),
            arguments: serde_json::json!({}),
        };
        let h = harness(vec![reply_with(mystery)]);

        let outcome = h.engine.run_turn(request("alice", "do something")).await.unwrap();

        assert_eq!(outcome.state.status, ConversationStatus::Completed);
        assert!(outcome.suspension.is_none());
        assert!(h.gateway.executed().is_empty());
    }

    #[tokio::test]
    async fn test_tools_disabled_ends_turn() {
        let safe_call = ToolCall {
            id: "call_list".to_string(),
            name: "list_http_requests".to_string(),
            arguments: serde_json::json!({}),
        };
        let mut config = test_config();
        config.tool_calls_enabled = false;
        let h = harness_with(
            vec![reply_with(safe_call)],
            vec![],
            RecordingGateway::new(),
            config,
        );

        let outcome = h.engine.run_turn(request("alice", "list requests")).await.unwrap();

        assert_eq!(outcome.state.status, ConversationStatus::Completed);
        assert!(h.gateway.executed().is_empty());
        assert_eq!(h.model.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_budget_ends_looping_turn() {
        let call = |i: u32| ToolCall {
            id: format!("call_{i}"),
            name: "list_http_requests".to_string(),
            arguments: serde_json::json!({}),
        };
        let mut config = test_config();
        config.max_tool_rounds = 2;
        let h = harness_with(
            vec![reply_with(call(1)), reply_with(call(2)), reply_with(call(3))],
            vec![],
            RecordingGateway::new(),
            config,
        );

        let outcome = h.engine.run_turn(request("alice", "keep listing")).await.unwrap();

        assert_eq!(outcome.state.status, ConversationStatus::Completed);
        assert_eq!(h.gateway.executed().len(), 2);
        assert_eq!(h.model.invocation_count(), 3);
    }

    // ── Review gate ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unsafe_tool_suspends_without_executing() {
        let h = harness(vec![reply_with(delete_call())]);

        let outcome = suspended_turn(&h, "alice").await;

        let payload = outcome.suspension.unwrap();
        assert_eq!(payload.tool_call_id, "call_del");
        assert_eq!(payload.tool_name, "delete_http_requests");
        assert!(payload.question.contains("delete_http_requests"));
        assert!(h.gateway.executed().is_empty());

        // suspension was checkpointed with the pending review in place
        let tip = h
            .engine
            .checkpoints
            .get("alice", &outcome.conversation_id)
            .unwrap()
            .unwrap();
        assert_eq!(tip.state.status, ConversationStatus::Interrupted);
        assert!(tip.state.pending_review.is_some());
    }

    #[tokio::test]
    async fn test_resume_accept_executes_original_arguments() {
        let h = harness(vec![
            reply_with(delete_call()),
            ModelReply::text("Deleted 14 requests."),
        ]);
        let outcome = suspended_turn(&h, "alice").await;

        let resumed = h
            .engine
            .resume_turn(
                &Identity::new("alice"),
                &outcome.conversation_id,
                ToolCallDecision {
                    tool_call_id: "call_del".to_string(),
                    action: ReviewAction::Accept,
                },
            )
            .await
            .unwrap();

        assert_eq!(resumed.state.status, ConversationStatus::Completed);
        assert!(resumed.state.pending_review.is_none());
        let executed = h.gateway.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].arguments, serde_json::json!({"older_than_days": 30}));

        let records = h.audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "accept");
        assert_eq!(records[0].user_id, "al***");
    }

    #[tokio::test]
    async fn test_resume_edit_executes_edited_arguments() {
        let h = harness(vec![
            reply_with(delete_call()),
            ModelReply::text("Deleted 2 requests."),
        ]);
        let outcome = suspended_turn(&h, "alice").await;

        let resumed = h
            .engine
            .resume_turn(
                &Identity::new("alice"),
                &outcome.conversation_id,
                ToolCallDecision {
                    tool_call_id: "call_del".to_string(),
                    action: ReviewAction::Edit {
                        arguments: serde_json::json!({"older_than_days": 365}),
                    },
                },
            )
            .await
            .unwrap();

        assert_eq!(resumed.state.status, ConversationStatus::Completed);
        let executed = h.gateway.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].id, "call_del");
        assert_eq!(executed[0].arguments, serde_json::json!({"older_than_days": 365}));
        assert_eq!(h.audit.records()[0].action, "edit");
    }

    #[tokio::test]
    async fn test_resume_reject_never_touches_gateway() {
        let h = harness(vec![
            reply_with(delete_call()),
            ModelReply::text("Understood, leaving them in place."),
        ]);
        let outcome = suspended_turn(&h, "alice").await;

        let resumed = h
            .engine
            .resume_turn(
                &Identity::new("alice"),
                &outcome.conversation_id,
                ToolCallDecision {
                    tool_call_id: "call_del".to_string(),
                    action: ReviewAction::Reject {
                        message: Some("too risky right now".to_string()),
                    },
                },
            )
            .await
            .unwrap();

        assert_eq!(resumed.state.status, ConversationStatus::Completed);
        assert!(h.gateway.executed().is_empty());
        assert_eq!(h.audit.records()[0].action, "reject");

        // the model saw the abort marker and the reviewer's note
        let (messages, _) = h.model.invocation(1);
        assert!(messages
            .iter()
            .any(|m| m.content().contains("aborted by the user")));
        assert!(messages
            .iter()
            .any(|m| m.content().contains("too risky right now")));
    }

    #[tokio::test]
    async fn test_resume_feedback_feeds_text_to_model() {
        let h = harness(vec![
            reply_with(delete_call()),
            ModelReply::text("Will do a dry run first."),
        ]);
        let outcome = suspended_turn(&h, "alice").await;

        let resumed = h
            .engine
            .resume_turn(
                &Identity::new("alice"),
                &outcome.conversation_id,
                ToolCallDecision {
                    tool_call_id: "call_del".to_string(),
                    action: ReviewAction::Feedback {
                        message: "run it with dry_run=true first".to_string(),
                    },
                },
            )
            .await
            .unwrap();

        assert_eq!(resumed.state.status, ConversationStatus::Completed);
        assert!(h.gateway.executed().is_empty());
        let (messages, _) = h.model.invocation(1);
        let tool_result = messages
            .iter()
            .find(|m| matches!(m, Message::Tool { .. }))
            .unwrap();
        assert_eq!(tool_result.content(), "run it with dry_run=true first");
    }

    #[tokio::test]
    async fn test_decision_is_consumed_exactly_once() {
        let h = harness(vec![
            reply_with(delete_call()),
            ModelReply::text("Deleted."),
        ]);
        let outcome = suspended_turn(&h, "alice").await;
        let decision = || ToolCallDecision {
            tool_call_id: "call_del".to_string(),
            action: ReviewAction::Accept,
        };

        h.engine
            .resume_turn(&Identity::new("alice"), &outcome.conversation_id, decision())
            .await
            .unwrap();

        let second = h
            .engine
            .resume_turn(&Identity::new("alice"), &outcome.conversation_id, decision())
            .await;
        assert!(matches!(second, Err(EngineError::Validation { .. })));
        // the call ran once, not twice
        assert_eq!(h.gateway.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_decision_id_preserves_pending_review() {
        let h = harness(vec![
            reply_with(delete_call()),
            ModelReply::text("Deleted."),
        ]);
        let outcome = suspended_turn(&h, "alice").await;

        let wrong = h
            .engine
            .resume_turn(
                &Identity::new("alice"),
                &outcome.conversation_id,
                ToolCallDecision {
                    tool_call_id: "call_other".to_string(),
                    action: ReviewAction::Accept,
                },
            )
            .await;
        assert!(matches!(wrong, Err(EngineError::Validation { .. })));

        // the gate is still armed; the right id still works
        let resumed = h
            .engine
            .resume_turn(
                &Identity::new("alice"),
                &outcome.conversation_id,
                ToolCallDecision {
                    tool_call_id: "call_del".to_string(),
                    action: ReviewAction::Accept,
                },
            )
            .await
            .unwrap();
        assert_eq!(resumed.state.status, ConversationStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_unknown_conversation() {
        let h = harness(vec![]);
        let result = h
            .engine
            .resume_turn(
                &Identity::new("alice"),
                "no-such-conversation",
                ToolCallDecision {
                    tool_call_id: "call_del".to_string(),
                    action: ReviewAction::Accept,
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(EngineError::ConversationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cross_user_resume_is_denied() {
        let h = harness(vec![reply_with(delete_call())]);
        let outcome = suspended_turn(&h, "alice").await;

        // qualified foreign key: rejected before any read
        let qualified = format!("user:alice:{}", outcome.conversation_id);
        let denied = h
            .engine
            .resume_turn(
                &Identity::new("bob"),
                &qualified,
                ToolCallDecision {
                    tool_call_id: "call_del".to_string(),
                    action: ReviewAction::Accept,
                },
            )
            .await;
        assert!(matches!(denied, Err(EngineError::AccessDenied { .. })));

        // bare id resolves inside bob's own namespace, which is empty
        let missing = h
            .engine
            .resume_turn(
                &Identity::new("bob"),
                &outcome.conversation_id,
                ToolCallDecision {
                    tool_call_id: "call_del".to_string(),
                    action: ReviewAction::Accept,
                },
            )
            .await;
        assert!(matches!(
            missing,
            Err(EngineError::ConversationNotFound { .. })
        ));
        assert!(h.gateway.executed().is_empty());
    }

    // ── Cache behavior ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_repeated_question_served_from_cache() {
        let h = harness(vec![ModelReply::text("You have 3 open orders.")]);

        let first = h.engine.run_turn(request("alice", "list my orders")).await.unwrap();
        assert!(first.state.cache_miss);

        let second = h.engine.run_turn(request("alice", "list my orders")).await.unwrap();

        assert!(second.state.cache_hit);
        assert_eq!(second.state.status, ConversationStatus::Completed);
        assert_eq!(
            second.state.messages.last().unwrap().content(),
            "You have 3 open orders."
        );
        // one model call total: the second turn never reached the model
        assert_eq!(h.model.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_is_user_scoped() {
        let h = harness(vec![
            ModelReply::text("Alice has 3 orders."),
            ModelReply::text("Bob has 1 order."),
        ]);

        h.engine.run_turn(request("alice", "list my orders")).await.unwrap();
        let bob = h.engine.run_turn(request("bob", "list my orders")).await.unwrap();

        assert!(bob.state.cache_miss);
        assert_eq!(bob.state.messages.last().unwrap().content(), "Bob has 1 order.");
        assert_eq!(h.model.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_disabled_per_request() {
        let h = harness(vec![
            ModelReply::text("answer one"),
            ModelReply::text("answer two"),
        ]);
        let mut req = request("alice", "list my orders");
        req.options.cache_disabled = true;

        h.engine.run_turn(req.clone()).await.unwrap();
        let second = h.engine.run_turn(req).await.unwrap();

        assert!(!second.state.cache_hit);
        assert!(!second.state.cache_miss);
        assert_eq!(h.model.invocation_count(), 2);
    }

    // ── API selection ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_selected_specs_reach_the_model() {
        let h = harness_with(
            vec![ModelReply::text("The httpbin API lists requests.")],
            vec![
                ApiSelection {
                    title: "httpbin".to_string(),
                    version: "v1".to_string(),
                },
                // never offered by the catalog: dropped silently
                ApiSelection {
                    title: "made-up".to_string(),
                    version: "v9".to_string(),
                },
            ],
            RecordingGateway::new(),
            test_config(),
        );

        let outcome = h.engine.run_turn(request("alice", "what APIs exist?")).await.unwrap();

        assert_eq!(
            outcome.state.selected_apis,
            vec![ApiSelection {
                title: "httpbin".to_string(),
                version: "v1".to_string(),
            }]
        );
        let (_, spec_titles) = h.model.invocation(0);
        assert_eq!(spec_titles, vec!["httpbin"]);
    }

    // ── Failure paths ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_model_failure_checkpoints_error_status() {
        let h = harness(vec![]); // no scripted replies: invoke fails upstream
        let mut req = request("alice", "hello");
        req.conversation_id = Some("conv-err".to_string());

        let result = h.engine.run_turn(req).await;
        assert!(matches!(result, Err(EngineError::Invocation)));

        let tip = h
            .engine
            .checkpoints
            .get("alice", "conv-err")
            .unwrap()
            .unwrap();
        assert_eq!(tip.state.status, ConversationStatus::Error);
    }

    #[tokio::test]
    async fn test_client_error_surfaces_verbatim() {
        struct RejectingModel;

        #[async_trait]
        impl ModelClient for RejectingModel {
            async fn invoke(
                &self,
                _messages: &[Message],
                _api_specs: &[ApiSpec],
            ) -> Result<ModelReply, ModelError> {
                Err(ModelError::Client {
                    status: Some(400),
                    message: "context length exceeded".to_string(),
                })
            }

            async fn select_apis(
                &self,
                _messages: &[Message],
                _summaries: &[crate::gateway::ApiSummary],
            ) -> Result<SelectedApis, ModelError> {
                Ok(SelectedApis { apis: vec![] })
            }
        }

        let tmp = TempDir::new().unwrap();
        let config = test_config();
        let engine = TurnEngine::new(
            Arc::new(RejectingModel),
            RecordingGateway::new(),
            Arc::new(StaticCatalog::new(vec![httpbin_spec()])),
            Arc::new(MemoryAuditSink::new()),
            ResponseCache::new(Box::new(MemoryBackend::new()), config.cache_options()),
            SharedRateLimiter::new(tmp.path().join("limits.db"), config.rate_limit_registry()),
            CheckpointStore::open_sqlite(":memory:").unwrap(),
            config,
        );

        let result = engine.run_turn(request("alice", "hello")).await;
        assert!(matches!(
            result,
            Err(EngineError::ClientInvocation { message }) if message == "context length exceeded"
        ));
    }
}
