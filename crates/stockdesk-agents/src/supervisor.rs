use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use stockdesk_models::{Message, SupervisorConfig, Transcript, TranscriptUpdate, SUPERVISOR};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::AgentError;
use crate::printer::UpdateSink;
use crate::router::{RosterEntry, RouteDecision, Router};
use crate::specialist::SpecialistAgent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    AwaitingDecision,
    /// The named specialist holds the transcript.
    Delegating(String),
    Terminated,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub transcript: Transcript,
    /// Specialists in the order they were given control.
    pub delegations: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// The last message that is not hand-off bookkeeping.
    pub fn final_answer(&self) -> Option<&Message> {
        self.transcript
            .messages()
            .iter()
            .rev()
            .find(|m| !m.is_handoff())
    }
}

/// A run that stopped on a fatal error, with everything appended so far.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: AgentError,
    pub transcript: Transcript,
}

/// Owns the transcript for one run and hands it to one specialist at a time.
pub struct Supervisor {
    specialists: Vec<Arc<dyn SpecialistAgent>>,
    router: Arc<dyn Router>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        specialists: Vec<Arc<dyn SpecialistAgent>>,
        router: Arc<dyn Router>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            specialists,
            router,
            config,
        }
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.specialists
            .iter()
            .map(|s| RosterEntry::new(s.name(), s.description()))
            .collect()
    }

    fn specialist(&self, name: &str) -> Option<&Arc<dyn SpecialistAgent>> {
        self.specialists.iter().find(|s| s.name() == name)
    }

    pub async fn run(&self, query: &str, updates: &UpdateSink) -> Result<RunReport, RunFailure> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let roster = self.roster();
        info!(run_id = %run_id, agents = roster.len(), "Starting run");

        let mut transcript = Transcript::new(query);
        let mut delegations = Vec::new();
        let mut state = SupervisorState::AwaitingDecision;

        while state != SupervisorState::Terminated {
            let step = match state {
                SupervisorState::AwaitingDecision => {
                    self.decide(&mut transcript, &roster, delegations.len(), updates)
                        .await
                }
                SupervisorState::Delegating(agent) => {
                    let outcome = self.delegate(&agent, &mut transcript, updates).await;
                    outcome.map(|()| {
                        delegations.push(agent);
                        SupervisorState::AwaitingDecision
                    })
                }
                SupervisorState::Terminated => Ok(SupervisorState::Terminated),
            };

            state = match step {
                Ok(next) => next,
                Err(e) => {
                    error!(run_id = %run_id, error = %e, delegations = delegations.len(), "Run failed");
                    return Err(RunFailure {
                        error: e,
                        transcript,
                    });
                }
            };
        }

        info!(
            run_id = %run_id,
            delegations = delegations.len(),
            messages = transcript.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Run complete"
        );
        Ok(RunReport {
            run_id,
            transcript,
            delegations,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Ask the router for the next state. A closing summary is appended
    /// as the supervisor's last message.
    async fn decide(
        &self,
        transcript: &mut Transcript,
        roster: &[RosterEntry],
        delegated: usize,
        updates: &UpdateSink,
    ) -> Result<SupervisorState, AgentError> {
        match self.router.choose_next(transcript, roster).await? {
            RouteDecision::Done { summary } => {
                if let Some(summary) = summary {
                    let message = Message::assistant(summary).with_name(SUPERVISOR);
                    transcript.push(message.clone());
                    updates.emit(TranscriptUpdate::node(SUPERVISOR, vec![message]));
                }
                info!(delegations = delegated, "Supervisor finished");
                Ok(SupervisorState::Terminated)
            }
            RouteDecision::Delegate { agent } => {
                if self.specialist(&agent).is_none() {
                    return Err(AgentError::UnknownAgent(agent));
                }
                if delegated >= self.config.max_delegations {
                    return Err(AgentError::DelegationLimit(self.config.max_delegations));
                }
                Ok(SupervisorState::Delegating(agent))
            }
        }
    }

    async fn delegate(
        &self,
        agent: &str,
        transcript: &mut Transcript,
        updates: &UpdateSink,
    ) -> Result<(), AgentError> {
        let specialist = self
            .specialist(agent)
            .ok_or_else(|| AgentError::UnknownAgent(agent.to_string()))?;

        if self.config.show_handoffs {
            let start_record = Message::handoff_start(agent);
            transcript.push(start_record.clone());
            updates.emit(TranscriptUpdate::node(SUPERVISOR, vec![start_record]));
        }

        info!(agent = %agent, "Delegating");
        let mark = transcript.len();
        specialist.act(transcript, updates).await?;

        if self.config.show_handoffs {
            transcript.push(Message::handoff_return(agent));
        }
        updates.emit(TranscriptUpdate::node(agent, transcript.since(mark).to_vec()));
        Ok(())
    }
}
