//! Judge oracle seam and the per-call protocol.
//!
//! A judge is data ([`Judge`]); an oracle is the capability that answers a prompt
//! on its behalf. [`judge_pair`] wraps one call with the timeout and strict-JSON
//! retry rules and reports how it went.

pub mod prompt;
pub mod remote;
pub mod simulated;
pub mod verdict;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::gateway::ProviderError;
use crate::model::{Judge, PresentedOrder};

pub use prompt::{JudgePrompt, DEFAULT_CRITERION};
pub use remote::GatewayOracle;
pub use simulated::{JudgeProfile, SimulatedOracle, SimulationSpec};
pub use verdict::{parse_verdict, Verdict};

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Output did not match the verdict contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("judge call timed out after {0:?}")]
    Timeout(Duration),

    #[error("judge unavailable: {0}")]
    Unavailable(String),
}

impl JudgeError {
    pub fn is_timeout(&self) -> bool {
        match self {
            JudgeError::Timeout(_) => true,
            JudgeError::Provider(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Answers judge prompts. Returns the raw reply; parsing is the caller's job.
#[async_trait]
pub trait JudgeOracle: Send + Sync {
    async fn complete(&self, judge: &Judge, prompt: &JudgePrompt) -> Result<String, JudgeError>;
}

/// One proposal as seen by a judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairSide {
    pub id: String,
    pub text: String,
}

impl PairSide {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A pair plus its pre-drawn presentation order.
#[derive(Debug, Clone)]
pub struct PairRequest {
    pub match_id: String,
    pub criterion: String,
    pub candidate_a: PairSide,
    pub candidate_b: PairSide,
    pub order: PresentedOrder,
}

impl PairRequest {
    pub fn prompt(&self) -> JudgePrompt {
        let (first, second) = match self.order {
            PresentedOrder::AFirst => (self.candidate_a.clone(), self.candidate_b.clone()),
            PresentedOrder::BFirst => (self.candidate_b.clone(), self.candidate_a.clone()),
        };
        JudgePrompt::new(self.match_id.clone(), self.criterion.clone(), first, second)
    }
}

/// Retry rules for a single judge call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// Per-attempt deadline. Default: 120 s
    pub timeout_ms: u64,
    /// Extra attempts with the same judge after a timeout. Default: 1
    pub timeout_retries: u32,
    /// Extra attempts (with a format reminder) after unparseable output. Default: 1
    pub protocol_retries: u32,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            timeout_retries: 1,
            protocol_retries: 1,
        }
    }
}

impl CallPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    /// Valid verdict after at least one retry.
    RetryOk,
    /// Output never matched the contract; the call is dropped.
    ProtocolFailure,
    /// Every allowed attempt timed out; the caller may pick a replacement judge.
    TimedOut,
    /// The oracle failed outright (provider error, missing judge).
    Unavailable,
}

impl CallStatus {
    pub fn is_valid(self) -> bool {
        matches!(self, CallStatus::Ok | CallStatus::RetryOk)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Ok => "ok",
            CallStatus::RetryOk => "retry_ok",
            CallStatus::ProtocolFailure => "protocol_failure",
            CallStatus::TimedOut => "timed_out",
            CallStatus::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JudgeCallOutcome {
    pub status: CallStatus,
    pub verdict: Option<Verdict>,
    pub attempts: u32,
    pub error: Option<String>,
    /// Last raw reply, kept for audit when the call failed.
    pub raw_response: Option<String>,
    pub prompt_hash: String,
}

/// Run one judge call under `policy`.
///
/// A timeout is retried with the same judge up to `timeout_retries` times. Unparseable
/// output is retried with a reminder up to `protocol_retries` times. Nothing is ever
/// coerced into a verdict.
pub async fn judge_pair(
    oracle: &dyn JudgeOracle,
    judge: &Judge,
    request: &PairRequest,
    policy: &CallPolicy,
) -> JudgeCallOutcome {
    let mut prompt = request.prompt();
    let prompt_hash = prompt.hash();
    let mut timeouts = 0u32;
    let mut protocol_failures = 0u32;
    let mut attempts = 0u32;

    let finish = |status: CallStatus,
                  verdict: Option<Verdict>,
                  attempts: u32,
                  error: Option<String>,
                  raw_response: Option<String>| JudgeCallOutcome {
        status,
        verdict,
        attempts,
        error,
        raw_response,
        prompt_hash: prompt_hash.clone(),
    };

    loop {
        prompt.attempt = attempts;
        attempts += 1;
        let result = match tokio::time::timeout(policy.timeout(), oracle.complete(judge, &prompt))
            .await
        {
            Ok(inner) => inner,
            Err(_) => Err(JudgeError::Timeout(policy.timeout())),
        };

        match result {
            Ok(raw) => match parse_verdict(&raw) {
                Ok(verdict) => {
                    let status = if attempts > 1 {
                        CallStatus::RetryOk
                    } else {
                        CallStatus::Ok
                    };
                    debug!(match_id = %request.match_id, judge = %judge.id, attempts, "verdict");
                    return finish(status, Some(verdict), attempts, None, None);
                }
                Err(err) => {
                    protocol_failures += 1;
                    if protocol_failures > policy.protocol_retries {
                        warn!(
                            match_id = %request.match_id,
                            judge = %judge.id,
                            error = %err,
                            "judge output rejected, dropping call"
                        );
                        return finish(
                            CallStatus::ProtocolFailure,
                            None,
                            attempts,
                            Some(err.to_string()),
                            Some(raw),
                        );
                    }
                    debug!(match_id = %request.match_id, judge = %judge.id, error = %err, "retrying with reminder");
                    prompt.reminder = true;
                }
            },
            Err(err) if err.is_timeout() => {
                timeouts += 1;
                if timeouts > policy.timeout_retries {
                    warn!(match_id = %request.match_id, judge = %judge.id, "judge timed out");
                    return finish(
                        CallStatus::TimedOut,
                        None,
                        attempts,
                        Some(err.to_string()),
                        None,
                    );
                }
                debug!(match_id = %request.match_id, judge = %judge.id, "retrying after timeout");
            }
            Err(err) => {
                warn!(match_id = %request.match_id, judge = %judge.id, error = %err, "judge unavailable");
                return finish(
                    CallStatus::Unavailable,
                    None,
                    attempts,
                    Some(err.to_string()),
                    None,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted replies in order; `None` means "hang past the deadline".
    struct Scripted {
        replies: Mutex<VecDeque<Option<&'static str>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Option<&'static str>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    #[async_trait]
    impl JudgeOracle for Scripted {
        async fn complete(&self, _: &Judge, _: &JudgePrompt) -> Result<String, JudgeError> {
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Some(reply)) => Ok(reply.to_string()),
                Some(None) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(String::new())
                }
                None => Err(JudgeError::Unavailable("script exhausted".into())),
            }
        }
    }

    fn request() -> PairRequest {
        PairRequest {
            match_id: "R1-M01-J1".into(),
            criterion: DEFAULT_CRITERION.into(),
            candidate_a: PairSide::new("a", "alpha"),
            candidate_b: PairSide::new("b", "beta"),
            order: PresentedOrder::AFirst,
        }
    }

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout_ms: 50,
            ..Default::default()
        }
    }

    const GOOD: &str = r#"{"winner": "A", "confidence": 0.8, "rationale": "ok"}"#;

    #[tokio::test]
    async fn test_first_try_ok() {
        let oracle = Scripted::new(vec![Some(GOOD)]);
        let out = judge_pair(&oracle, &Judge::new("j", "p"), &request(), &policy()).await;
        assert_eq!(out.status, CallStatus::Ok);
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn test_protocol_retry_then_drop() {
        let oracle = Scripted::new(vec![Some("nope"), Some(GOOD)]);
        let out = judge_pair(&oracle, &Judge::new("j", "p"), &request(), &policy()).await;
        assert_eq!(out.status, CallStatus::RetryOk);

        let oracle = Scripted::new(vec![Some("nope"), Some(r#"{"winner": "tie"}"#)]);
        let out = judge_pair(&oracle, &Judge::new("j", "p"), &request(), &policy()).await;
        assert_eq!(out.status, CallStatus::ProtocolFailure);
        assert!(out.verdict.is_none());
        assert_eq!(out.raw_response.as_deref(), Some(r#"{"winner": "tie"}"#));
    }

    #[tokio::test]
    async fn test_timeout_retried_once_with_same_judge() {
        let oracle = Scripted::new(vec![None, Some(GOOD)]);
        let out = judge_pair(&oracle, &Judge::new("j", "p"), &request(), &policy()).await;
        assert_eq!(out.status, CallStatus::RetryOk);
        assert_eq!(out.attempts, 2);

        let oracle = Scripted::new(vec![None, None, Some(GOOD)]);
        let out = judge_pair(&oracle, &Judge::new("j", "p"), &request(), &policy()).await;
        assert_eq!(out.status, CallStatus::TimedOut);
        assert_eq!(out.attempts, 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_unavailable() {
        let oracle = Scripted::new(vec![]);
        let out = judge_pair(&oracle, &Judge::new("j", "p"), &request(), &policy()).await;
        assert_eq!(out.status, CallStatus::Unavailable);
    }

    #[test]
    fn test_prompt_follows_presented_order() {
        let mut req = request();
        req.order = PresentedOrder::BFirst;
        let prompt = req.prompt();
        assert_eq!(prompt.first.id, "b");
        assert_eq!(prompt.second.id, "a");
    }
}
