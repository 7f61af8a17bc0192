//! Call admission: decide a call's fate before any audio flows.
//!
//! One inbound call runs the state machine
//! `ResolveAgent → EvaluateRouting → EvaluateServiceHours →
//! BuildSessionConfig`, terminating early with a signaled disposition:
//! rejected calls and forwarded calls are expected outcomes the caller
//! logs and ends cleanly, not failures.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use thiserror::Error;

use crate::core::directory::{
    CallContext, DirectoryError, DirectoryResolver, normalize_number,
};
use crate::core::routing::{self, RouteOutcome, in_service_hours};
use crate::core::session::{RelaySessionConfig, SessionHooks, build_session_config};

/// Faults while admitting a call. Distinct from [`RejectReason`]: a
/// rejection is a decided outcome, an error is a broken dependency.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Directory lookup failed
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Why a call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The called number has no active agent
    NoActiveAgent,
    /// Outside service hours with no usable manual fallback
    OutsideServiceHours,
}

/// An admitted, AI-handled call ready for the relay engine.
pub struct AdmittedCall {
    /// Per-call context
    pub context: CallContext,
    /// Immutable session configuration
    pub config: RelaySessionConfig,
}

/// Terminal disposition of one inbound call.
pub enum Disposition {
    /// Log and end the call; no session of any kind
    Rejected(RejectReason),
    /// Pass the call through to a human number; no AI socket is opened
    ForwardOnly {
        /// Where the call goes
        number: String,
    },
    /// Hand the call to the relay engine
    Relay(Box<AdmittedCall>),
}

/// One inbound call as the telephony platform presents it.
#[derive(Debug, Clone, Default)]
pub struct InboundCall {
    /// Caller number
    pub from: String,
    /// Called number
    pub to: String,
    /// Telephony platform call id
    pub call_id: Option<String>,
    /// Explicit assistant override
    pub assistant_id: Option<String>,
    /// Called-number record id
    pub number_id: Option<String>,
}

/// The admission controller. Owns no per-call state; one instance serves
/// every call.
pub struct AdmissionController {
    resolver: Arc<dyn DirectoryResolver>,
    reference_zone: Tz,
}

impl AdmissionController {
    /// Create a controller over the given directory, evaluating service
    /// hours in the deployment's reference time zone.
    pub fn new(resolver: Arc<dyn DirectoryResolver>, reference_zone: Tz) -> Self {
        Self {
            resolver,
            reference_zone,
        }
    }

    /// Decide the disposition of one inbound call.
    pub async fn admit(
        &self,
        call: InboundCall,
        now: DateTime<Utc>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Result<Disposition, AdmissionError> {
        let from = normalize_number(&call.from);
        let to = normalize_number(&call.to);
        let call_id = call.call_id.clone().unwrap_or_default();

        // ResolveAgent
        let Some(agent) = self.resolver.resolve_agent(&to).await? else {
            tracing::info!(%to, "No agent owns this number, rejecting call");
            return Ok(Disposition::Rejected(RejectReason::NoActiveAgent));
        };
        if !agent.active {
            tracing::info!(%to, agent = %agent.id, "Agent inactive, rejecting call");
            return Ok(Disposition::Rejected(RejectReason::NoActiveAgent));
        }

        // EvaluateRouting
        let mut forward_assistant_id = None;
        match routing::evaluate(&agent.routing_rules, now) {
            RouteOutcome::Forward(number) => {
                tracing::info!(%call_id, %number, "Routing rule forwards this call");
                return Ok(Disposition::ForwardOnly { number });
            }
            RouteOutcome::Assistant(id) => forward_assistant_id = Some(id),
            RouteOutcome::NoMatch => {}
        }

        // EvaluateServiceHours
        let is_in_service_hours =
            in_service_hours(&agent.weekly_hours, now, self.reference_zone);
        let has_fallback = agent.manual_fallback_enabled
            && agent
                .transfer_number
                .as_deref()
                .is_some_and(|n| !n.is_empty());
        if !is_in_service_hours && !has_fallback {
            tracing::info!(%call_id, agent = %agent.id, "Outside service hours, rejecting call");
            return Ok(Disposition::Rejected(RejectReason::OutsideServiceHours));
        }

        // BuildSessionConfig
        let assistant_id = forward_assistant_id
            .clone()
            .or_else(|| call.assistant_id.clone())
            .or_else(|| agent.default_assistant_id.clone());
        let resolved = self
            .resolver
            .resolve_assistant(&from, &to, assistant_id.as_deref())
            .await?;

        let config = build_session_config(&resolved, &agent, hooks);
        let context = CallContext {
            from,
            to,
            call_id,
            stream_id: String::new(),
            assistant_id,
            number_id: call.number_id,
            agent_id: agent.id.clone(),
            forward_assistant_id,
            human_contact_phone: agent.human_contact_phone.clone(),
            transfer_number: agent.transfer_number.clone(),
            is_in_service_hours,
            manual_fallback_enabled: agent.manual_fallback_enabled,
            is_transferred: false,
            resolved_prompt: resolved.prompt.clone(),
            function_schemas: resolved.function_schemas.clone(),
            order_state: serde_json::Value::Null,
            caller_profile: None,
            last_caller_profile: None,
        };

        Ok(Disposition::Relay(Box::new(AdmittedCall { context, config })))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directory::{AgentRecord, AssistantRecord, ResolvedAssistant};
    use crate::core::routing::{InboundRoutingRule, RuleTarget, WeeklySchedule};
    use crate::core::session::NoopHooks;
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone, Weekday};
    use std::collections::HashMap;

    struct FixedResolver {
        agent: Option<AgentRecord>,
    }

    #[async_trait]
    impl DirectoryResolver for FixedResolver {
        async fn resolve_agent(&self, _to: &str) -> Result<Option<AgentRecord>, DirectoryError> {
            Ok(self.agent.clone())
        }

        async fn resolve_assistant(
            &self,
            _from: &str,
            _to: &str,
            assistant_id: Option<&str>,
        ) -> Result<ResolvedAssistant, DirectoryError> {
            Ok(ResolvedAssistant {
                assistant: AssistantRecord {
                    id: assistant_id.unwrap_or("fallback").to_string(),
                    model: "gpt-4o-realtime-preview".to_string(),
                    ..Default::default()
                },
                prompt: "prompt".to_string(),
                function_schemas: vec![],
            })
        }
    }

    fn open_all_week() -> WeeklySchedule {
        let mut raw = HashMap::new();
        for day in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            raw.insert(day, vec!["00:00-23:59".to_string()]);
        }
        WeeklySchedule::parse(&raw).unwrap()
    }

    fn active_agent() -> AgentRecord {
        AgentRecord {
            id: "agent-1".to_string(),
            active: true,
            weekly_hours: open_all_week(),
            default_assistant_id: Some("pizzeria".to_string()),
            ..Default::default()
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 12, 0, 0).unwrap()
    }

    fn controller(agent: Option<AgentRecord>) -> AdmissionController {
        AdmissionController::new(Arc::new(FixedResolver { agent }), Tz::UTC)
    }

    fn call() -> InboundCall {
        InboundCall {
            from: "+1 (555) 010-0100".to_string(),
            to: "+1 (555) 010-0199".to_string(),
            call_id: Some("CA1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_no_agent_is_rejected() {
        let disposition = controller(None)
            .admit(call(), noon(), Arc::new(NoopHooks))
            .await
            .unwrap();
        assert!(matches!(
            disposition,
            Disposition::Rejected(RejectReason::NoActiveAgent)
        ));
    }

    #[tokio::test]
    async fn test_inactive_agent_is_rejected() {
        let mut agent = active_agent();
        agent.active = false;
        let disposition = controller(Some(agent))
            .admit(call(), noon(), Arc::new(NoopHooks))
            .await
            .unwrap();
        assert!(matches!(
            disposition,
            Disposition::Rejected(RejectReason::NoActiveAgent)
        ));
    }

    #[tokio::test]
    async fn test_forward_rule_short_circuits() {
        let mut agent = active_agent();
        agent.routing_rules = vec![InboundRoutingRule {
            time_zone: "UTC".to_string(),
            days: vec![],
            is_full_day: true,
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            is_emergency: false,
            target: RuleTarget::Forward("+15550100123".to_string()),
        }];
        let disposition = controller(Some(agent))
            .admit(call(), noon(), Arc::new(NoopHooks))
            .await
            .unwrap();
        match disposition {
            Disposition::ForwardOnly { number } => assert_eq!(number, "+15550100123"),
            _ => panic!("Expected ForwardOnly"),
        }
    }

    #[tokio::test]
    async fn test_outside_hours_without_fallback_is_rejected() {
        let mut agent = active_agent();
        agent.weekly_hours = WeeklySchedule::default();
        let disposition = controller(Some(agent))
            .admit(call(), noon(), Arc::new(NoopHooks))
            .await
            .unwrap();
        assert!(matches!(
            disposition,
            Disposition::Rejected(RejectReason::OutsideServiceHours)
        ));
    }

    #[tokio::test]
    async fn test_fallback_requires_transfer_number() {
        let mut agent = active_agent();
        agent.weekly_hours = WeeklySchedule::default();
        agent.manual_fallback_enabled = true;
        agent.transfer_number = None;
        let disposition = controller(Some(agent))
            .admit(call(), noon(), Arc::new(NoopHooks))
            .await
            .unwrap();
        assert!(matches!(
            disposition,
            Disposition::Rejected(RejectReason::OutsideServiceHours)
        ));
    }

    #[tokio::test]
    async fn test_outside_hours_with_fallback_reaches_relay() {
        let mut agent = active_agent();
        agent.weekly_hours = WeeklySchedule::default();
        agent.manual_fallback_enabled = true;
        agent.transfer_number = Some("+15550100123".to_string());
        let disposition = controller(Some(agent))
            .admit(call(), noon(), Arc::new(NoopHooks))
            .await
            .unwrap();
        match disposition {
            Disposition::Relay(admitted) => {
                assert!(!admitted.context.is_in_service_hours);
                assert_eq!(
                    admitted.context.transfer_number.as_deref(),
                    Some("+15550100123")
                );
            }
            _ => panic!("Expected Relay"),
        }
    }

    #[tokio::test]
    async fn test_admitted_call_context() {
        let disposition = controller(Some(active_agent()))
            .admit(call(), noon(), Arc::new(NoopHooks))
            .await
            .unwrap();
        match disposition {
            Disposition::Relay(admitted) => {
                let ctx = admitted.context;
                assert_eq!(ctx.from, "+15550100100");
                assert_eq!(ctx.to, "+15550100199");
                assert_eq!(ctx.call_id, "CA1");
                assert_eq!(ctx.agent_id, "agent-1");
                assert_eq!(ctx.assistant_id.as_deref(), Some("pizzeria"));
                assert!(ctx.is_in_service_hours);
                assert!(!ctx.is_transferred);
            }
            _ => panic!("Expected Relay"),
        }
    }

    #[tokio::test]
    async fn test_routing_assistant_overrides_default() {
        let mut agent = active_agent();
        agent.routing_rules = vec![InboundRoutingRule {
            time_zone: "UTC".to_string(),
            days: vec![],
            is_full_day: true,
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            is_emergency: false,
            target: RuleTarget::Assistant("after-hours".to_string()),
        }];
        let disposition = controller(Some(agent))
            .admit(call(), noon(), Arc::new(NoopHooks))
            .await
            .unwrap();
        match disposition {
            Disposition::Relay(admitted) => {
                assert_eq!(
                    admitted.context.forward_assistant_id.as_deref(),
                    Some("after-hours")
                );
                assert_eq!(admitted.context.assistant_id.as_deref(), Some("after-hours"));
            }
            _ => panic!("Expected Relay"),
        }
    }
}
