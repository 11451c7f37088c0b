//! 编排器主流程
//!
//! 负责：会话创建、单次 ingest 的阶段推进（外部协作者调用 + 治理更新 +
//! 全程留痕）、状态快照读取。协作者与存储经构造函数注入，无全局状态。
//! 阶段严格顺序执行，不回跳；未知会话与预算触顶提前终止。
//! 协作者失败已在实现内部吸收；这里只有持久化错误会中断请求。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::agents::{HintContext, OcrAgent, SolverAgent, TutorAgent};
use crate::config::AppConfig;
use crate::governance::goodhart::{
    evaluate_hidden_score, model_observed_setpoint_targets, non_transfer_recurrence,
};
use crate::governance::hint_guard::apply_hint_guard;
use crate::governance::stress::{compute_shared_stress, make_ai_factors, make_viktor_factors};
use crate::governance::setpoints::update_setpoints;
use crate::governance::triggers::normalize_trigger;
use crate::schemas::{
    IngestEventRequest, Session, SessionCreateRequest, SessionState, TriggerType,
    TutorTurnResponse, TurnStatus,
};
use crate::storage::{short_id, SetpointSnapshot, Storage, StorageError, TutorTurnRecord};
use crate::verifier::ClaimVerifier;

/// 置信度低于该值时整轮标记为 uncertain
const UNCERTAIN_CONFIDENCE_FLOOR: f64 = 0.45;

/// 应用服务：封装辅导循环的全部编排行为
pub struct Orchestrator {
    config: AppConfig,
    storage: Arc<Storage>,
    ocr: Arc<dyn OcrAgent>,
    solver: Arc<dyn SolverAgent>,
    tutor: Arc<dyn TutorAgent>,
    verifier: Arc<dyn ClaimVerifier>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        storage: Arc<Storage>,
        ocr: Arc<dyn OcrAgent>,
        solver: Arc<dyn SolverAgent>,
        tutor: Arc<dyn TutorAgent>,
        verifier: Arc<dyn ClaimVerifier>,
    ) -> Self {
        Self {
            config,
            storage,
            ocr,
            solver,
            tutor,
            verifier,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// 创建会话，设定点取策略默认
    pub fn create_session(&self, req: &SessionCreateRequest) -> Result<Session, StorageError> {
        let created = self.storage.create_session(
            &req.student_alias,
            req.topic.as_deref(),
            req.grade_level.as_deref(),
            req.goal.as_deref(),
            &self.config.policy.setpoints,
        )?;
        tracing::info!(session_id = %created.session_id, "session created");
        Ok(Session {
            session_id: created.session_id,
            created_at: created.created_at,
            active_setpoints: created.active_setpoints,
        })
    }

    /// 单次 ingest：阶段严格顺序推进
    pub async fn ingest(
        &self,
        session_id: &str,
        req: &IngestEventRequest,
    ) -> Result<TutorTurnResponse, StorageError> {
        let trace_id = short_id();

        // received：未知会话直接终止，零副作用
        let Some(session) = self.storage.get_session(session_id)? else {
            return Ok(TutorTurnResponse {
                status: TurnStatus::Error,
                tutor_message: format!("Unknown session: {session_id}"),
                confidence: 0.0,
                requires_attempt: true,
                flags: vec!["session_not_found".to_string()],
                trace_id,
            });
        };

        // budget_check：触顶时留痕并软停，后续阶段一律不执行
        let budget = self.storage.budget_snapshot(
            self.config.budget.monthly_cap_usd,
            self.config.budget.per_session_soft_cap_usd,
            session_id,
        )?;
        if budget.monthly_spent_usd >= budget.monthly_cap_usd
            || budget.session_spent_usd >= budget.per_session_soft_cap_usd
        {
            tracing::warn!(%trace_id, session_id, "budget cap reached, blocking ingest");
            self.storage.save_event(
                &trace_id,
                session_id,
                "budget_blocked",
                &json!({ "budget_snapshot": budget }),
            )?;
            return Ok(TutorTurnResponse {
                status: TurnStatus::BudgetBlocked,
                tutor_message: "Budget cap reached. Meta-governor approval is required before \
                                continuing."
                    .to_string(),
                confidence: 0.0,
                requires_attempt: true,
                flags: vec!["budget_cap_reached".to_string()],
                trace_id,
            });
        }

        let trigger = normalize_trigger(
            req.trigger_type,
            req.idle_seconds,
            req.user_message.as_deref(),
            self.config.policy.idle_threshold_seconds,
        );
        tracing::info!(%trace_id, session_id, ?trigger, "ingest received");
        // 原始事件原样落盘（审计与复发率统计都依赖它）
        self.storage.save_event(
            &trace_id,
            session_id,
            "ingest_received",
            &json!({
                "trigger_type": trigger,
                "idle_seconds": req.idle_seconds,
                "has_image": req.image_base64.is_some(),
                "problem_text": &req.problem_text,
                "ocr_text": &req.ocr_text,
                "latex_text": &req.latex_text,
                "user_message": &req.user_message,
            }),
        )?;

        // ocr
        let ocr = self.ocr.prepare(req).await;
        if ocr.usage.cost > 0.0 {
            self.storage.add_budget_entry(
                &trace_id,
                Some(session_id),
                "ocr",
                ocr.usage.cost,
                Some(&self.config.models.ocr_model),
                &json!({ "source": &ocr.source }),
            )?;
        }

        // solve
        let solver = self
            .solver
            .solve(&ocr.normalized_problem, &ocr.normalized_working)
            .await;
        self.storage.save_solver_run(&trace_id, session_id, &solver)?;
        if solver.usage.cost > 0.0 {
            self.storage.add_budget_entry(
                &trace_id,
                Some(session_id),
                "solver",
                solver.usage.cost,
                Some(&solver.model),
                &json!({ "status": &solver.status }),
            )?;
        }

        // verify
        let verifier = self.verifier.verify(&solver.symbolic_claims);
        self.storage
            .save_verifier_run(&trace_id, session_id, &verifier)?;

        // setpoint_read：快照 > 会话存量 > 策略默认
        let setpoints_current = self
            .storage
            .get_latest_setpoints(session_id, &self.config.policy.setpoints)?;

        // compose_hint
        let tutor = self
            .tutor
            .compose_hint(HintContext {
                problem_text: &ocr.normalized_problem,
                working_text: &ocr.normalized_working,
                solver: &solver,
                verifier: &verifier,
                setpoints: &setpoints_current,
                no_direct_answer_before_attempt: self
                    .config
                    .policy
                    .no_direct_answer_before_attempt,
                max_hint_depth: self.config.policy.max_hint_depth,
            })
            .await;
        if tutor.usage.cost > 0.0 {
            self.storage.add_budget_entry(
                &trace_id,
                Some(session_id),
                "tutor",
                tutor.usage.cost,
                Some(&tutor.model),
                &json!({ "confidence": tutor.confidence }),
            )?;
        }

        // guard
        let guard = apply_hint_guard(
            &tutor.message,
            tutor.requires_attempt,
            self.config.policy.no_direct_answer_before_attempt,
            self.config.policy.max_hint_depth,
        );

        // governance_update
        let recent_errors =
            self.recent_error_types(session_id, self.config.policy.recent_error_window)?;
        let non_transfer = non_transfer_recurrence(solver.error_type.as_deref(), &recent_errors);
        let repeated_confusion = if trigger == TriggerType::HelpRequest
            && recent_errors.len() >= self.config.policy.repeated_confusion_min_events
            && non_transfer >= self.config.policy.repeated_confusion_min_rate
        {
            1.0
        } else {
            0.0
        };
        let post_hint_progress =
            has_student_attempt(req) && trigger != TriggerType::HelpRequest;

        let goodhart = evaluate_hidden_score(
            guard.penalty,
            verifier.disagreement_rate,
            repeated_confusion,
            post_hint_progress,
            tutor.requires_attempt,
            &self.config.policy.goodhart_thresholds,
        );

        let observed_targets = model_observed_setpoint_targets(
            &goodhart,
            verifier.disagreement_rate,
            non_transfer,
        );
        let update = update_setpoints(
            &setpoints_current,
            &observed_targets,
            self.config.policy.setpoint_update.ewma_alpha,
            self.config.policy.setpoint_update.max_daily_drift,
            Utc::now(),
            Some(session.updated_at),
        );
        self.storage
            .update_session_setpoints(session_id, &update.setpoints)?;
        self.storage.save_setpoint_snapshot(
            session_id,
            &SetpointSnapshot {
                setpoints: update.setpoints.clone(),
                observed_targets,
                drift: update.drift,
                trace_id: trace_id.clone(),
            },
        )?;

        let ai_factors = make_ai_factors(
            verifier.disagreement_rate,
            repeated_confusion,
            if guard.penalty > 0.0 { 1.0 } else { 0.0 },
            tutor.latency_ms + solver.latency_ms,
            self.config.policy.sla_ms,
            non_transfer,
        );
        let viktor_factors = make_viktor_factors(
            req.idle_seconds.unwrap_or(0.0),
            self.config.policy.idle_threshold_seconds,
            if post_hint_progress { 0.0 } else { 0.5 },
            non_transfer,
        );
        let (stress_ai, stress_viktor) = compute_shared_stress(
            &ai_factors,
            &viktor_factors,
            &self.config.policy.stress_weights_ai,
            &self.config.policy.stress_weights_viktor,
        );
        self.storage.save_stress_snapshot(
            session_id,
            stress_ai,
            stress_viktor,
            &json!({ "ai": ai_factors, "viktor": viktor_factors, "trace_id": &trace_id }),
        )?;

        // persist：标志并集 + 辅导轮次记录 + 收尾事件
        let mut flags: BTreeSet<String> = BTreeSet::new();
        flags.extend(tutor.flags.iter().cloned());
        flags.extend(guard.flags.iter().cloned());
        flags.extend(goodhart.flags.iter().cloned());
        if verifier.disagreement_rate >= 0.5 {
            flags.insert("verifier_disagreement".to_string());
        }
        let flags: Vec<String> = flags.into_iter().collect();

        self.storage.save_tutor_turn(&TutorTurnRecord {
            trace_id: &trace_id,
            session_id,
            model: &tutor.model,
            tutor_message: &guard.message,
            confidence: tutor.confidence,
            requires_attempt: tutor.requires_attempt,
            flags: &flags,
            hidden_score: goodhart.hidden_score,
            leakage_penalty: goodhart.leakage_penalty,
            usage: &tutor.usage,
            latency_ms: tutor.latency_ms,
        })?;
        self.storage.save_event(
            &trace_id,
            session_id,
            "pipeline_completed",
            &json!({
                "trigger_type": trigger,
                "solver_error_type": &solver.error_type,
                "verifier_disagreement": verifier.disagreement_rate,
                "hidden_score": goodhart.hidden_score,
                "stress_ai": stress_ai,
                "stress_viktor": stress_viktor,
                "flags": &flags,
            }),
        )?;

        // respond
        let status = if verifier.disagreement_rate >= 0.5
            || tutor.confidence < UNCERTAIN_CONFIDENCE_FLOOR
        {
            TurnStatus::Uncertain
        } else {
            TurnStatus::Ok
        };
        tracing::info!(%trace_id, session_id, ?status, "pipeline completed");
        Ok(TutorTurnResponse {
            status,
            tutor_message: guard.message,
            confidence: tutor.confidence,
            requires_attempt: tutor.requires_attempt,
            flags,
            trace_id,
        })
    }

    /// 会话状态快照；未知会话返回空快照（HTTP 层自行先做 404 判定）
    pub fn get_state(&self, session_id: &str) -> Result<SessionState, StorageError> {
        if self.storage.get_session(session_id)?.is_none() {
            return Ok(SessionState {
                setpoints: BTreeMap::new(),
                stress: Default::default(),
                last_events: Vec::new(),
                budget_snapshot: Default::default(),
            });
        }
        Ok(SessionState {
            setpoints: self
                .storage
                .get_latest_setpoints(session_id, &self.config.policy.setpoints)?,
            stress: self.storage.get_latest_stress(session_id)?,
            last_events: self.storage.get_recent_events(session_id, 10)?,
            budget_snapshot: self.storage.budget_snapshot(
                self.config.budget.monthly_cap_usd,
                self.config.budget.per_session_soft_cap_usd,
                session_id,
            )?,
        })
    }

    /// 数据保留：剥离超期事件的原始题面字段
    pub fn run_retention(
        &self,
        retention_days: u32,
    ) -> Result<crate::storage::RetentionReport, StorageError> {
        self.storage.run_retention(retention_days)
    }

    /// 近期事件负载中的 solver_error_type 序列（复发率统计输入）
    fn recent_error_types(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let events = self.storage.get_recent_events(session_id, limit)?;
        Ok(events
            .iter()
            .filter_map(|evt| evt.payload.get("solver_error_type"))
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect())
    }
}

/// 学生是否提交了任何非空输入（自由文本 / OCR / LaTeX）
fn has_student_attempt(req: &IngestEventRequest) -> bool {
    [&req.user_message, &req.ocr_text, &req.latex_text]
        .iter()
        .any(|field| field.as_deref().is_some_and(|s| !s.trim().is_empty()))
}
