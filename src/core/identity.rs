//! Unified identity orchestrator.
//!
//! Owns the bridge (state, energy, declaration chain) and every ARIL
//! sidecar, and drives the session boundary: capture → forward evolve →
//! outcome → attribution → replicator update → observation → persist.
//! All cross-pass weight comparisons go through value snapshots taken
//! before the forward pass; nothing downstream ever reads a live
//! reference it could see mutated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::attribution::{
    compute_shapley, CorrelationTracker, MobiusCharacteristic, MobiusDiagnostics,
    ShapleyAttribution,
};
use crate::core::config::CoreConfig;
use crate::core::observer::{InteractionRecord, SessionObserver, ToolCall};
use crate::core::storage::consolidate::{consolidated_init, Snapshot, SnapshotRing};
use crate::core::storage::file_log::state_entry;
use crate::core::storage::state::PersistedState;
use crate::core::storage::{LogEntry, PrivateLog, StorageResult};
use crate::dynamics::chain::{apply_declaration, ContinuityProof, DeclarationChain};
use crate::dynamics::energy::{compute_energy_gradient, energy};
use crate::dynamics::evolve::evolve;
use crate::dynamics::{DynamicsParams, SelfState, Vocabulary};
use crate::error::{IdentityError, IdentityResult};
use crate::intel::guidance::Directive;
use crate::intel::{
    extract_features, DomainTracker, GuidanceEngine, Insight, InsightCompiler, StrategyFeatures,
};
use crate::learning::audit::PendingSnapshot;
use crate::learning::modes::adaptive_barrier;
use crate::learning::{
    ConfidenceCalibrator, ModeObserver, ModeReport, OutcomeEvaluator, OutcomeInputs,
    OutcomeReport, ReplicatorOptimizer, SignalAudit,
};
use crate::llm::{parse_insights, reflection_prompt, LanguageModel};
use crate::telemetry::TelemetryClient;
use crate::utils::numerics::{mean, safe_finite, validate_len_finite};

/// Everything the host gets back from one completed session.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub outcome: OutcomeReport,
    pub attributions: Vec<f64>,
    pub attribution_confidence: f64,
    pub blend_alpha: f64,
    pub delta_w: Vec<f64>,
    pub mode: ModeReport,
    pub directives: Vec<Directive>,
    pub features: StrategyFeatures,
    pub expertise: f64,
    pub insights: Vec<Insight>,
}

/// Aggregated view for status surfaces.
#[derive(Clone, Debug, serde::Serialize)]
pub struct IdentityStatus {
    pub agent_id: String,
    pub session_count: u64,
    pub dimensions: Vec<(String, f64)>,
    pub fitness: Vec<f64>,
    pub coherence_gap: f64,
    pub chain: ContinuityProof,
    pub mobius: MobiusDiagnostics,
    pub domains: Vec<(String, f64)>,
}

pub struct UnifiedIdentity {
    agent_id: String,
    config: CoreConfig,

    // Bridge
    vocab: Vocabulary,
    state: SelfState,
    params: DynamicsParams,
    chain: DeclarationChain,

    // Sidecars
    observer: SessionObserver,
    evaluator: OutcomeEvaluator,
    correlation: CorrelationTracker,
    mobius: MobiusCharacteristic,
    optimizer: ReplicatorOptimizer,
    mode_observer: ModeObserver,
    calibrator: ConfidenceCalibrator,
    domains: DomainTracker,
    compiler: InsightCompiler,
    guidance: GuidanceEngine,
    audit: SignalAudit,
    snapshots: SnapshotRing,

    // Collaborators
    log: Option<Arc<dyn PrivateLog>>,
    llm: Option<Arc<dyn LanguageModel>>,
    telemetry: Option<TelemetryClient>,
    telemetry_nonce: Option<String>,

    save_in_flight: AtomicBool,
    log_sequence: u64,
}

impl UnifiedIdentity {
    /// Fresh identity: coherent uniform state at the homeostatic target.
    pub fn new(agent_id: impl Into<String>, vocab: Vocabulary, config: CoreConfig) -> Self {
        let n = vocab.len();
        let state = SelfState::uniform(n, 0.5);
        let params = DynamicsParams::balanced(n);
        let mut mode_observer = ModeObserver::new(n);
        mode_observer.seed(energy(&state, &params, &vocab));
        let telemetry = config.telemetry.as_ref().map(TelemetryClient::new);

        UnifiedIdentity {
            agent_id: agent_id.into(),
            config,
            vocab,
            state,
            params,
            chain: DeclarationChain::new(),
            observer: SessionObserver::new(),
            evaluator: OutcomeEvaluator::new(),
            correlation: CorrelationTracker::new(n),
            mobius: MobiusCharacteristic::new(n),
            optimizer: ReplicatorOptimizer::new(n),
            mode_observer,
            calibrator: ConfidenceCalibrator::new(n),
            domains: DomainTracker::new(),
            compiler: InsightCompiler::new(),
            guidance: GuidanceEngine::new(),
            audit: SignalAudit::new(),
            snapshots: SnapshotRing::new(),
            log: None,
            llm: None,
            telemetry,
            telemetry_nonce: None,
            save_in_flight: AtomicBool::new(false),
            log_sequence: 0,
        }
    }

    pub fn with_log(mut self, log: Arc<dyn PrivateLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Wake from the stored log: restore all sidecars, verify the chain
    /// (failing fast on tamper), and re-initialize the starting point
    /// from the snapshot ring.
    pub async fn wake(
        agent_id: impl Into<String>,
        vocab: Vocabulary,
        config: CoreConfig,
        log: Arc<dyn PrivateLog>,
    ) -> IdentityResult<Self> {
        let agent_id = agent_id.into();
        let stored = log.load_state().await?;
        let mut identity = UnifiedIdentity::new(agent_id, vocab, config).with_log(log);
        let Some(blob) = stored else {
            info!("[Identity] no stored state, starting fresh");
            return Ok(identity);
        };
        let persisted = match PersistedState::from_json(blob) {
            Ok(p) => p,
            Err(e) => {
                warn!("[Identity] stored state unreadable ({}), starting fresh", e);
                return Ok(identity);
            }
        };
        identity.restore(persisted)?;
        Ok(identity)
    }

    /// Field-by-field restore. Invalid numeric fields are dropped so the
    /// owning subsystem re-initializes; a tampered chain aborts the wake.
    fn restore(&mut self, p: PersistedState) -> IdentityResult<()> {
        let n = self.vocab.len();

        let chain = DeclarationChain::from_entries(p.chain);
        let verification = chain.verify();
        if !verification.valid {
            return Err(IdentityError::ChainStateInvalid(
                verification.errors.join("; "),
            ));
        }
        self.chain = chain;

        if validate_len_finite("state.weights", &p.state.weights, n)
            && validate_len_finite("state.self_model", &p.state.self_model, n)
        {
            self.state = SelfState::new(p.state.weights, p.state.self_model)?;
            self.state.time = safe_finite(p.state.time, 0.0).max(0.0);
        }
        if validate_len_finite("params.target", &p.params.target, n) {
            self.params = p.params;
            self.params.barrier = self.params.barrier.clamp(0.0, 1.0);
        }

        let fitness = validate_len_finite("fitness", &p.fitness, n).then_some(p.fitness);
        let meta_rates =
            validate_len_finite("meta_rates", &p.meta_rates, n).then_some(p.meta_rates);
        self.optimizer
            .restore(fitness, meta_rates, p.session_count, p.recent_attributions);

        self.audit = SignalAudit::restore(p.audit);

        if let Some(correlation) = p.correlation {
            if correlation.dims() == n {
                self.correlation = correlation;
            }
        }
        if let Some(mobius) = p.mobius {
            if mobius.dims() == n {
                self.mobius = mobius;
            }
        }
        self.evaluator = OutcomeEvaluator::restore(p.outcome_baseline, p.outcome_sessions);
        if let Some(calibrator) = p.calibrator {
            if calibrator.dims() == n {
                self.calibrator = calibrator;
            }
        }
        if let Some(compiler) = p.compiler {
            self.compiler = compiler;
        }
        if let Some(domains) = p.domains {
            self.domains = domains;
        }

        let energy_history: Vec<f64> = p
            .observer_energy
            .into_iter()
            .filter(|e| e.is_finite())
            .collect();
        let noise: Vec<Vec<f64>> = p
            .observer_noise
            .into_iter()
            .map(|series| series.into_iter().filter(|x| x.is_finite()).collect())
            .collect();
        self.mode_observer.restore(energy_history, noise, p.observer_sessions);
        if self.mode_observer.energy_history().is_empty() {
            let e = energy(&self.state, &self.params, &self.vocab);
            self.mode_observer.seed(e);
        }

        self.snapshots = SnapshotRing::restore(p.snapshots);
        if let Some(init) = consolidated_init(&self.snapshots, n) {
            self.state = SelfState::new(init.weights, self.state.self_model.clone())?;
            self.optimizer.assign_fitness(init.fitness);
            self.optimizer.assign_meta_rates(init.meta_rates);
            info!(
                "[Identity] consolidated init from {} snapshots",
                self.snapshots.len()
            );
        }

        self.log_sequence = p.session_count;
        info!(
            "[Identity] woke '{}' at session {} with {} chain entries",
            self.agent_id,
            p.session_count,
            self.chain.len()
        );
        Ok(())
    }

    // ---- accessors -------------------------------------------------------

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn state(&self) -> &SelfState {
        &self.state
    }

    pub fn params(&self) -> &DynamicsParams {
        &self.params
    }

    pub fn chain(&self) -> &DeclarationChain {
        &self.chain
    }

    pub fn fitness(&self) -> &[f64] {
        self.optimizer.fitness()
    }

    pub fn session_count(&self) -> u64 {
        self.optimizer.session_count()
    }

    pub fn audit(&self) -> &SignalAudit {
        &self.audit
    }

    pub fn snapshots(&self) -> &SnapshotRing {
        &self.snapshots
    }

    pub fn status(&self) -> IdentityStatus {
        IdentityStatus {
            agent_id: self.agent_id.clone(),
            session_count: self.optimizer.session_count(),
            dimensions: self
                .vocab
                .names()
                .iter()
                .cloned()
                .zip(self.state.weights.iter().copied())
                .collect(),
            fitness: self.optimizer.fitness().to_vec(),
            coherence_gap: self.state.coherence_gap(),
            chain: self.chain.continuity_proof(&self.state, &self.params),
            mobius: self.mobius.diagnostics(),
            domains: self
                .domains
                .profiles()
                .keys()
                .map(|tag| (tag.clone(), self.domains.expertise(tag)))
                .collect(),
        }
    }

    /// Record an explicit declaration: the chain extends and both state
    /// vectors move to the declared value (coherence can only improve).
    pub fn declare(&mut self, index: usize, value: f64, content: impl Into<String>) {
        if index >= self.vocab.len() {
            warn!(
                "[Identity] declaration index {} out of range (N={}), ignored",
                index,
                self.vocab.len()
            );
            return;
        }
        let decl = self.chain.create_declaration(index, value, content.into());
        apply_declaration(&mut self.state, &decl);
        self.chain.append(decl);
    }

    // ---- session boundary ------------------------------------------------

    pub async fn start_session(&mut self, session_id: &str) -> IdentityResult<()> {
        if self.observer.is_active() {
            return Err(IdentityError::SessionAlreadyActive(
                self.observer.active_id().unwrap_or_default().to_string(),
            ));
        }
        self.observer.begin(session_id);
        if let Some(telemetry) = &self.telemetry {
            // Fire-and-forget: a dead channel leaves the nonce empty and
            // the end ping is skipped.
            self.telemetry_nonce = telemetry.start_ping(&self.agent_id).await;
        }
        Ok(())
    }

    pub fn record_tool_call(&mut self, call: ToolCall) {
        self.observer.record_tool_call(call);
    }

    pub fn record_decision(&mut self, text: &str) {
        self.observer.record_decision(text);
    }

    pub fn record_failure(&mut self, text: &str) {
        self.observer.record_failure(text);
    }

    pub fn record_verification(&mut self, text: &str) {
        self.observer.record_verification(text);
    }

    pub fn record_information_seek(&mut self, text: &str) {
        self.observer.record_information_seek(text);
    }

    pub async fn end_session(&mut self) -> IdentityResult<SessionReport> {
        self.end_session_with_signals(&[]).await
    }

    /// Close the active session, running the full forward/backward pass.
    /// `external_signals` are optional caller-supplied outcome signals
    /// such as ("git_survived", 1.0, 0.2).
    pub async fn end_session_with_signals(
        &mut self,
        external_signals: &[(String, f64, f64)],
    ) -> IdentityResult<SessionReport> {
        // 1. Harvest the capture.
        let record = self.observer.harvest().ok_or(IdentityError::NoActiveSession)?;
        let session_index = self.optimizer.session_count() + 1;

        // 2. Value snapshot before the forward pass — the attribution
        //    baseline and the audit log's authoritative pre-state.
        let weights_session_start = self.state.weights.clone();
        let energy_before = energy(&self.state, &self.params, &self.vocab);
        let coherence_before = self.state.coherence_gap();

        // 3. Forward: evolve under the session's experience drive, then
        //    apply any declarations earned by reflection.
        let features = extract_features(&record);
        let experience = self.experience_drive(&features);
        for _ in 0..self.config.evolution.steps_per_session {
            let step = evolve(
                &self.state,
                &experience,
                &self.params,
                &self.vocab,
                self.config.evolution.dt,
            );
            self.state = step.state;
        }

        let insights = self.reflect(&record).await;
        let mut declarations_made = 0usize;
        for insight in &insights {
            if insight.pivotal
                && insight.confidence >= self.config.reflection.declaration_confidence
                && insight.dimension < self.vocab.len()
            {
                let adjusted = self
                    .calibrator
                    .adjust_confidence(insight.dimension, insight.confidence);
                let decl = self.chain.create_declaration(
                    insight.dimension,
                    insight.suggested_value,
                    format!("{} (confidence {:.2})", insight.interpretation, adjusted),
                );
                apply_declaration(&mut self.state, &decl);
                self.chain.append(decl);
                declarations_made += 1;
            }
        }

        let energy_after = energy(&self.state, &self.params, &self.vocab);
        let coherence_after = self.state.coherence_gap();

        // 4. Gradient at the post-forward state; weight changes measured
        //    against the pre-forward snapshot, never the live object.
        let grad = compute_energy_gradient(&self.state, &self.params, &self.vocab);
        let weight_changes: Vec<f64> = self
            .state
            .weights
            .iter()
            .zip(&weights_session_start)
            .map(|(now, start)| now - start)
            .collect();

        // 5. Outcome.
        let pivotal_confidences: Vec<f64> = insights
            .iter()
            .filter(|i| i.pivotal)
            .map(|i| i.confidence)
            .collect();
        let outcome = self.evaluator.evaluate(&OutcomeInputs {
            record: &record,
            energy_before,
            energy_after,
            coherence_before,
            coherence_after,
            declarations_made,
            pivotal_confidences: &pivotal_confidences,
            external_signals,
        });

        // Phase-1 audit: the pre-gradient view.
        self.audit.begin(PendingSnapshot {
            session_index,
            timestamp: record.end_time,
            r: outcome.r,
            r_adj: outcome.r_adj,
            signals: outcome.signals.clone(),
            weights_session_start: weights_session_start.clone(),
            weights_before: self.state.weights.clone(),
            meta_learning_rates: self.optimizer.meta_rates().to_vec(),
        });

        // 6. Attribution: exact Shapley, blended with the learned
        //    characteristic once it has data.
        let correlations = if self.correlation.sessions() >= self.config.correlation_min_sessions
        {
            Some(self.correlation.correlations())
        } else {
            None
        };
        let additive: ShapleyAttribution =
            compute_shapley(outcome.r, &weight_changes, correlations.as_deref());

        self.mobius.observe(
            &self.state.weights,
            &weights_session_start,
            outcome.r,
            session_index,
        );
        let alpha = self.mobius.blend_alpha();
        let attributions: Vec<f64> = if alpha > 0.0 {
            let learned = self.mobius.shapley();
            additive
                .values
                .iter()
                .zip(&learned)
                .map(|(a, m)| (1.0 - alpha) * a + alpha * m)
                .collect()
        } else {
            additive.values.clone()
        };

        // Signed deviations feed the correlation tracker — magnitudes
        // would erase the direction the correlation needs.
        self.correlation.update(&weight_changes, outcome.r);

        // 7. Replicator update, then the phase-2 audit commit.
        let update = self.optimizer.step(
            &mut self.state.weights,
            &grad.gradients,
            &grad.hessian_diag,
            &attributions,
            outcome.r_adj,
        );
        self.audit.commit(
            self.state.weights.clone(),
            &update,
            attributions.clone(),
            self.optimizer.fitness().to_vec(),
            Some(alpha),
            Some(self.mobius.grand_value()),
        );

        // 8. Fitness on the raw outcome, meta rates on attribution noise,
        //    then the observers.
        self.optimizer.update_fitness(outcome.r, &attributions);
        self.optimizer.update_meta_rates(&attributions);

        let mode = self.mode_observer.observe(
            &self.state,
            &grad,
            &self.params,
            &self.vocab,
            &update.outcome_term,
        );

        let total_phi: f64 = attributions.iter().map(|a| a.abs()).sum();
        for i in 0..self.vocab.len() {
            let predicted = if total_phi > 1e-12 {
                (attributions[i].abs() / total_phi).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let realized_share = {
                let total: f64 = weight_changes.iter().map(|c| c.abs()).sum();
                if total > 1e-12 {
                    (weight_changes[i].abs() / total).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            };
            self.calibrator.update(i, predicted, realized_share);
        }

        let tags = DomainTracker::classify(&record.tool_calls);
        self.domains
            .record_session(&tags, outcome.r, mean(&grad.hessian_diag));
        let expertise = self.domains.peak_expertise(&tags);

        for insight in insights.iter().cloned() {
            self.compiler.ingest(insight);
        }
        self.compiler
            .compile(self.optimizer.fitness(), &attributions, session_index);
        self.compiler.decay(self.optimizer.fitness(), session_index);

        // 9. Adaptive barrier follows expertise.
        self.params.barrier = adaptive_barrier(expertise);

        // 10. Snapshot and persist.
        self.snapshots.push(Snapshot {
            weights: self.state.weights.clone(),
            fitness: self.optimizer.fitness().to_vec(),
            outcome: outcome.r,
            hessian_diag: grad.hessian_diag.clone(),
            attributions: attributions.clone(),
            expertise,
            timestamp: record.end_time,
        });

        if self.log.is_some() {
            self.log_sequence += 1;
            let entry = LogEntry {
                interaction_id: record.id.clone(),
                sequence: self.log_sequence,
                interaction: Some(record.clone()),
                insights: insights.clone(),
                metadata: json!({
                    "r": outcome.r,
                    "r_adj": outcome.r_adj,
                    "energy_delta": outcome.energy_delta,
                }),
                timestamp: record.end_time,
            };
            if let Some(log) = &self.log {
                if let Err(e) = log.append(&entry).await {
                    warn!("[Identity] session entry append failed: {}", e);
                }
            }
            if let Err(e) = self.save().await {
                warn!("[Identity] state save failed: {}", e);
            }
        }

        // 11. Telemetry end ping, if the start ping answered.
        if let (Some(telemetry), Some(nonce)) = (&self.telemetry, self.telemetry_nonce.take()) {
            telemetry
                .end_ping(
                    &nonce,
                    json!({
                        "agent": self.agent_id,
                        "session": session_index,
                        "r": outcome.r,
                    }),
                )
                .await;
        }

        let directives = self.guidance.rank(
            &self.vocab,
            self.optimizer.fitness(),
            &grad.gradients,
            self.compiler.patterns(),
            Some(&mode),
            Some(&self.mobius.diagnostics()),
        );

        debug!(
            "[Identity] session {} closed: R={:.3} alpha={:.2} ||deltaW||={:.4}",
            session_index,
            outcome.r,
            alpha,
            crate::utils::numerics::norm(&update.delta)
        );

        Ok(SessionReport {
            outcome,
            attributions,
            attribution_confidence: additive.confidence,
            blend_alpha: alpha,
            delta_w: update.delta,
            mode,
            directives,
            features,
            expertise,
            insights,
        })
    }

    /// Map the five strategy features onto the leading dimensions as a
    /// centered drive in [−gain, gain]; dimensions beyond the feature
    /// set relax freely.
    fn experience_drive(&self, features: &StrategyFeatures) -> Vec<f64> {
        let gain = self.config.evolution.experience_gain;
        let raw = features.as_vec();
        (0..self.vocab.len())
            .map(|i| {
                raw.get(i)
                    .map(|f| gain * (2.0 * f - 1.0))
                    .unwrap_or(0.0)
            })
            .collect()
    }

    async fn reflect(&self, record: &InteractionRecord) -> Vec<Insight> {
        let Some(llm) = &self.llm else {
            return Vec::new();
        };
        let summary = session_summary(record);
        let prompt = reflection_prompt(&summary, self.vocab.names());
        match llm.generate(&prompt, None).await {
            Ok(text) => parse_insights(&text, self.vocab.len()),
            Err(e) => {
                debug!("[Identity] reflection failed (treated as no insights): {}", e);
                Vec::new()
            }
        }
    }

    /// Persist the full sidecar state under the reserved log slot.
    /// Re-entrant calls are dropped, not queued.
    pub async fn save(&self) -> StorageResult<bool> {
        let Some(log) = &self.log else {
            return Ok(false);
        };
        if self.save_in_flight.swap(true, Ordering::SeqCst) {
            debug!("[Identity] save already in flight, dropping attempt");
            return Ok(false);
        }
        let result = async {
            let persisted = self.persisted_state();
            let blob = persisted
                .to_json()
                .map_err(|e| crate::core::storage::StorageError::Serialization(e.to_string()))?;
            log.append(&state_entry(self.optimizer.session_count(), blob))
                .await?;
            Ok(true)
        }
        .await;
        self.save_in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn persisted_state(&self) -> PersistedState {
        PersistedState {
            vocabulary: self.vocab.clone(),
            state: self.state.clone(),
            params: self.params.clone(),
            chain: self.chain.entries().to_vec(),
            fitness: self.optimizer.fitness().to_vec(),
            meta_rates: self.optimizer.meta_rates().to_vec(),
            session_count: self.optimizer.session_count(),
            recent_attributions: self
                .optimizer
                .recent_attributions()
                .iter()
                .cloned()
                .collect(),
            audit: self.audit.entries().cloned().collect(),
            correlation: Some(self.correlation.clone()),
            mobius: Some(self.mobius.clone()),
            outcome_baseline: self.evaluator.baseline(),
            outcome_sessions: self.evaluator.sessions(),
            calibrator: Some(self.calibrator.clone()),
            compiler: Some(self.compiler.clone()),
            domains: Some(self.domains.clone()),
            observer_energy: self.mode_observer.energy_history().iter().copied().collect(),
            observer_noise: self
                .mode_observer
                .noise_history()
                .iter()
                .map(|s| s.iter().copied().collect())
                .collect(),
            observer_sessions: self.mode_observer.session_count(),
            snapshots: self.snapshots.to_vec(),
        }
    }

    /// Final save; the identity is unusable afterwards only by
    /// convention, no state is torn down.
    pub async fn shutdown(&mut self) -> StorageResult<()> {
        if self.observer.is_active() {
            warn!("[Identity] shutdown with an active session; capture discarded");
            self.audit.abort();
        }
        self.save().await?;
        Ok(())
    }
}

/// Spawn a periodic best-effort save for a shared identity. A tick that
/// finds a save already in flight is dropped, never queued; abort the
/// handle to stop.
pub fn spawn_autosave(
    identity: Arc<tokio::sync::Mutex<UnifiedIdentity>>,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let guard = identity.lock().await;
            if let Err(e) = guard.save().await {
                debug!("[Identity] autosave failed: {}", e);
            }
        }
    })
}

fn session_summary(record: &InteractionRecord) -> String {
    let tools: Vec<String> = record
        .tool_calls
        .iter()
        .map(|c| {
            let mut s = c.tool.clone();
            if let Some(p) = &c.path {
                s.push_str(&format!(" {}", p));
            }
            if let Some(cmd) = &c.command {
                s.push_str(&format!(" `{}`", cmd));
            }
            if !c.success {
                s.push_str(" [failed]");
            }
            s
        })
        .collect();
    format!(
        "tools:\n{}\ndecisions: {}\nfailures: {}\nverifications: {}",
        tools.join("\n"),
        record.decisions.join("; "),
        record.failures.join("; "),
        record.verifications.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::fully_connected(
            vec![
                "read_before_edit".into(),
                "test_after_change".into(),
                "context_gathering".into(),
                "output_verification".into(),
                "error_recovery".into(),
            ],
            0.2,
        )
        .unwrap()
    }

    fn productive_session_calls() -> Vec<ToolCall> {
        // deliberately skips re-reading the Write so the feature vector
        // (and therefore the experience drive) is not uniform
        vec![
            ToolCall::new("Read").with_path("src/lib.rs"),
            ToolCall::new("Grep"),
            ToolCall::new("Edit").with_path("src/lib.rs"),
            ToolCall::new("Bash").with_command("cargo test"),
            ToolCall::new("Write").with_path("src/out.rs"),
        ]
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut identity = UnifiedIdentity::new("a1", vocab(), CoreConfig::default());
        identity.start_session("s1").await.unwrap();
        assert!(matches!(
            identity.start_session("s2").await,
            Err(IdentityError::SessionAlreadyActive(_))
        ));
    }

    #[tokio::test]
    async fn end_without_start_throws() {
        let mut identity = UnifiedIdentity::new("a1", vocab(), CoreConfig::default());
        assert!(matches!(
            identity.end_session().await,
            Err(IdentityError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn record_outside_session_warns_but_does_not_throw() {
        let mut identity = UnifiedIdentity::new("a1", vocab(), CoreConfig::default());
        identity.record_tool_call(ToolCall::new("Read"));
        identity.record_decision("ok");
    }

    #[tokio::test]
    async fn session_produces_nonuniform_attribution() {
        let mut identity = UnifiedIdentity::new("a1", vocab(), CoreConfig::default());
        identity.start_session("s1").await.unwrap();
        for call in productive_session_calls() {
            identity.record_tool_call(call);
        }
        let report = identity.end_session().await.unwrap();

        assert!(report.outcome.r.is_finite());
        assert_eq!(report.attributions.len(), 5);
        // the aliasing defense: per-dim weight changes are measured
        // against the pre-forward snapshot, so a productive session must
        // not collapse to a uniform R/N split
        let first = report.attributions[0];
        assert!(
            report.attributions.iter().any(|a| (a - first).abs() > 1e-12),
            "uniform attribution suggests an aliased snapshot: {:?}",
            report.attributions
        );
        assert_eq!(identity.session_count(), 1);
        assert_eq!(identity.audit().len(), 1);
        let snap = identity.audit().latest().unwrap();
        assert_eq!(snap.weights_session_start, vec![0.5; 5]);
        assert_ne!(snap.weights_before, snap.weights_session_start);
    }

    #[tokio::test]
    async fn sessions_advance_counters_and_snapshots() {
        let mut identity = UnifiedIdentity::new("a1", vocab(), CoreConfig::default());
        for k in 0..7 {
            identity.start_session(&format!("s{}", k)).await.unwrap();
            for call in productive_session_calls() {
                identity.record_tool_call(call);
            }
            identity.end_session().await.unwrap();
        }
        assert_eq!(identity.session_count(), 7);
        assert_eq!(identity.snapshots().len(), 5, "snapshot ring is capped");
        assert_eq!(identity.audit().len(), 7);
    }

    #[tokio::test]
    async fn barrier_adapts_after_sessions() {
        let mut identity = UnifiedIdentity::new("a1", vocab(), CoreConfig::default());
        identity.start_session("s1").await.unwrap();
        identity.record_tool_call(ToolCall::new("Edit").with_path("src/main.rs"));
        identity.record_tool_call(ToolCall::new("Bash").with_command("cargo test"));
        identity.end_session().await.unwrap();
        // low expertise after one session -> tall barrier
        assert!(identity.params().barrier > 0.5);
        assert!(identity.params().barrier <= 0.75);
    }

    #[tokio::test]
    async fn status_reports_every_surface() {
        let mut identity = UnifiedIdentity::new("a1", vocab(), CoreConfig::default());
        identity.start_session("s1").await.unwrap();
        for call in productive_session_calls() {
            identity.record_tool_call(call);
        }
        identity.end_session().await.unwrap();
        let status = identity.status();
        assert_eq!(status.session_count, 1);
        assert_eq!(status.dimensions.len(), 5);
        assert_eq!(status.chain.chain_length, 0);
        assert!(status.chain.continuity_score >= 1.0 - 1e-12);
    }
}
