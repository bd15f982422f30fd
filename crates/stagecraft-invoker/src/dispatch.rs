//! Common enforcement wrapped around every [`InvokerBackend`] variant (spec
//! §4.D: "Every invoker enforces: validate input → execute → validate output
//! → emit a `SkillExecution` record").

use crate::backend::{InvocationRequest, InvokerBackend};
use serde_json::Value;
use stagecraft_core::{digest_of, schema, CancellationToken, StagecraftError, StagecraftResult};
use stagecraft_registry::Skill;
use stagecraft_tracker::{ExecutionStatus, SkillExecution, Tracker};

/// Ambient identifiers threaded through a dispatch call for recording and
/// cancellation, separate from the backend-visible [`InvocationRequest`].
pub struct DispatchContext<'a> {
    pub owner_id: &'a str,
    pub role_id: &'a str,
    pub cancellation: &'a CancellationToken,
}

/// The outcome of one dispatch: the validated output plus the record that
/// was appended to the tracker, so callers (the Orchestrator) can merge both
/// into `AgentContext.outputs` / `ExecutionState` without re-deriving them.
pub struct DispatchOutcome {
    pub output: Value,
    pub execution: SkillExecution,
}

/// Runs `skill` through `backend`, applying schema validation on both sides,
/// the skill's declared `timeout_ms`, cooperative cancellation, and tracker
/// recording. This is the sole entry point the Orchestrator should call —
/// never a bare `InvokerBackend::execute`.
pub async fn dispatch(
    backend: &dyn InvokerBackend,
    skill: &Skill,
    input: Value,
    shared_context: &Value,
    ctx: DispatchContext<'_>,
    tracker: &Tracker,
) -> StagecraftResult<DispatchOutcome> {
    if let Some(input_schema) = &skill.input_schema {
        let violations = schema::validate(input_schema, &input);
        if !violations.is_empty() {
            return Err(StagecraftError::Validation(format!(
                "skill '{}' input: {}",
                skill.id,
                violations.join("; ")
            )));
        }
    }

    let input_digest = digest_of(&input);
    let started_at = stagecraft_core::now();

    if ctx.cancellation.is_cancelled() {
        return Err(StagecraftError::Cancelled);
    }

    let request = InvocationRequest {
        skill,
        input: &input,
        context: shared_context,
    };

    let execution = backend.execute(request);
    let result = match skill.metadata.timeout_ms {
        Some(timeout_ms) => {
            let timeout = tokio::time::Duration::from_millis(timeout_ms);
            tokio::select! {
                biased;
                () = ctx.cancellation.cancelled() => Err(StagecraftError::Cancelled),
                outcome = tokio::time::timeout(timeout, execution) => {
                    match outcome {
                        Ok(inner) => inner,
                        Err(_) => Err(StagecraftError::Timeout(timeout_ms)),
                    }
                }
            }
        }
        None => {
            tokio::select! {
                biased;
                () = ctx.cancellation.cancelled() => Err(StagecraftError::Cancelled),
                outcome = execution => outcome,
            }
        }
    };

    let ended_at = stagecraft_core::now();

    let (status, error_kind, output) = match &result {
        Ok(output) => {
            if let Some(output_schema) = &skill.output_schema {
                let violations = schema::validate(output_schema, output);
                if !violations.is_empty() {
                    let record = SkillExecution::new(
                        skill.id.clone(),
                        ctx.owner_id,
                        ctx.role_id,
                        started_at,
                        ended_at,
                        ExecutionStatus::Failure,
                        Some("validation".to_string()),
                        None,
                        input_digest.clone(),
                        None,
                    );
                    tracker.record(record);
                    return Err(StagecraftError::Validation(format!(
                        "skill '{}' output: {}",
                        skill.id,
                        violations.join("; ")
                    )));
                }
            }
            (ExecutionStatus::Success, None, Some(output.clone()))
        }
        Err(StagecraftError::Timeout(_)) => (ExecutionStatus::Timeout, Some("timeout".to_string()), None),
        Err(StagecraftError::Cancelled) => (ExecutionStatus::Failure, Some("cancelled".to_string()), None),
        Err(other) => (ExecutionStatus::Failure, Some(error_kind_of(other)), None),
    };

    let output_digest = output.as_ref().map(digest_of);
    let score = matches!(status, ExecutionStatus::Success).then_some(1.0);

    let record = SkillExecution::new(
        skill.id.clone(),
        ctx.owner_id,
        ctx.role_id,
        started_at,
        ended_at,
        status,
        error_kind,
        score,
        input_digest,
        output_digest,
    );
    tracker.record(record.clone());

    match result {
        Ok(output) => Ok(DispatchOutcome {
            output,
            execution: record,
        }),
        Err(e) => Err(e),
    }
}

fn error_kind_of(err: &StagecraftError) -> String {
    match err {
        StagecraftError::Validation(_) => "validation".to_string(),
        StagecraftError::Execution(_) => "execution".to_string(),
        StagecraftError::InsufficientContext(_) => "insufficient_context".to_string(),
        StagecraftError::NoSkillAvailable(_) => "no_skill_available".to_string(),
        other => other.to_string(),
    }
}
