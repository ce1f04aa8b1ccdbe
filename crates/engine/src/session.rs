//! The session state machine.
//!
//! A session moves through four phases: signed out, idle, awaiting
//! generation and reviewing a result. Every operation checks the phase
//! it needs, so a caller can never rate or run code that does not
//! exist. State lives in a plain value the caller owns; the controller
//! holds the stores and the generation backend.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use providers::generate::{CodeGenerator, GenerateError};
use shared::types::{ChatEntry, CodeLanguage, Feedback, PreferenceError, Preferences};
use storage::credentials::AuthError;
use storage::{CredentialStore, StorageError, TenantStores};

use crate::bandit::{self, PromptBandit};
use crate::executor::{ExecutionReport, PythonRunner};
use crate::prompts::TEMPLATES;

/// Most chat entries loaded at login and shown in the transcript.
pub const HISTORY_LIMIT: usize = 10;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Idle,
    AwaitingGeneration,
    ReviewingResult,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Unauthenticated => "signed out",
            Phase::Idle => "idle",
            Phase::AwaitingGeneration => "awaiting generation",
            Phase::ReviewingResult => "reviewing a result",
        };
        f.write_str(label)
    }
}

/// One generated snippet under review.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub code: String,
    pub language: CodeLanguage,
    /// Template arm that produced it, for feedback attribution.
    pub arm: usize,
}

/// Counters shown by the stats command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub codes_generated: usize,
    pub feedback_score: i64,
}

/// Everything a single user session carries.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Durable id, kept across login and logout.
    pub session_id: Uuid,
    pub phase: Phase,
    pub username: Option<String>,
    pub preferences: Preferences,
    /// Newest first. Seeded from the store at login, then grows in
    /// memory as the session generates.
    pub history: Vec<ChatEntry>,
    /// Staged request text awaiting submission.
    pub pending_input: String,
    pub artifact: Option<Artifact>,
    pub feedback_score: i64,
    pub feedback_given: bool,
    pub bandit: PromptBandit,
}

impl SessionState {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    fn with_id(session_id: Uuid) -> Self {
        Self {
            session_id,
            phase: Phase::Unauthenticated,
            username: None,
            preferences: Preferences::default(),
            history: Vec::new(),
            pending_input: String::new(),
            artifact: None,
            feedback_score: 0,
            feedback_given: false,
            bandit: PromptBandit::new(TEMPLATES.len()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    /// Replaces the staged request text, as dictation and document
    /// ingestion do.
    pub fn stage_input(&mut self, text: &str) {
        self.pending_input = text.trim().to_string();
    }

    /// Visible transcript, oldest first, capped at the history limit.
    pub fn transcript(&self) -> impl Iterator<Item = &ChatEntry> {
        self.history.iter().take(HISTORY_LIMIT).rev()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            codes_generated: self.history.len(),
            feedback_score: self.feedback_score,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Knobs governing session behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPolicy {
    /// Save bandit estimates at logout and restore them at login.
    /// Off by default: each session starts learning fresh.
    pub persist_bandit: bool,
    /// Accept only the first rating per generated snippet. Off by
    /// default: repeated ratings keep nudging the learner.
    pub single_feedback_per_artifact: bool,
    /// Wall-clock bound for running generated snippets.
    pub execution_timeout: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("{operation} is not available while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },
    #[error("describe what to generate first")]
    EmptyRequest,
    #[error("feedback was already recorded for this result")]
    FeedbackAlreadyGiven,
    #[error("no generated code to act on")]
    NoArtifact,
    #[error("running {0} code is not supported")]
    UnsupportedLanguage(CodeLanguage),
    #[error(transparent)]
    Preferences(#[from] PreferenceError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Drives sessions against the stores and the generation backend.
pub struct SessionController {
    credentials: CredentialStore,
    tenants: TenantStores,
    generator: Arc<dyn CodeGenerator>,
    policy: SessionPolicy,
    runner: PythonRunner,
    epsilon: f64,
}

impl SessionController {
    pub fn new(
        credentials: CredentialStore,
        tenants: TenantStores,
        generator: Arc<dyn CodeGenerator>,
        policy: SessionPolicy,
    ) -> Self {
        let mut runner = PythonRunner::new();
        if let Some(limit) = policy.execution_timeout {
            runner = runner.with_timeout(limit);
        }
        Self {
            credentials,
            tenants,
            generator,
            policy,
            runner,
            epsilon: bandit::EPSILON,
        }
    }

    /// Overrides the exploration rate. Mainly for callers that need the
    /// greedy path to be deterministic.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn open_session(&self) -> SessionState {
        SessionState::new()
    }

    /// Creates an account, provisions its store and signs the session in.
    pub fn register(
        &self,
        state: &mut SessionState,
        username: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        expect_phase(state, Phase::Unauthenticated, "register")?;
        self.credentials.register(username, password)?;
        self.tenants.create(username)?;
        self.enter_authenticated(state, username)?;
        info!("Registered and signed in: {}", username);
        Ok(())
    }

    /// Verifies credentials and signs the session in, loading the
    /// tenant's preferences and recent history.
    pub fn login(
        &self,
        state: &mut SessionState,
        username: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        expect_phase(state, Phase::Unauthenticated, "login")?;
        self.credentials.authenticate(username, password)?;
        // Accounts can predate their store file
        self.tenants.create(username)?;
        self.enter_authenticated(state, username)?;
        info!("Signed in: {}", username);
        Ok(())
    }

    fn enter_authenticated(
        &self,
        state: &mut SessionState,
        username: &str,
    ) -> Result<(), SessionError> {
        state.preferences = self.tenants.get_preferences(username)?;
        state.history = self.tenants.load_recent_chat(username, HISTORY_LIMIT)?;
        state.bandit = if self.policy.persist_bandit {
            self.tenants
                .load_bandit_values(username, TEMPLATES.len())?
                .map(PromptBandit::from_values)
                .unwrap_or_else(|| PromptBandit::new(TEMPLATES.len()))
        } else {
            PromptBandit::new(TEMPLATES.len())
        };
        state.username = Some(username.to_string());
        state.pending_input.clear();
        state.artifact = None;
        state.feedback_score = 0;
        state.feedback_given = false;
        state.phase = Phase::Idle;
        Ok(())
    }

    /// Persists preferences (and bandit estimates when the policy keeps
    /// them), then returns the session to the signed-out phase. The
    /// durable session id survives.
    pub fn logout(&self, state: &mut SessionState) -> Result<(), SessionError> {
        let username = expect_authenticated(state)?;
        self.tenants.set_preferences(&username, &state.preferences)?;
        if self.policy.persist_bandit {
            self.tenants
                .save_bandit_values(&username, state.bandit.values())?;
        }
        *state = SessionState::with_id(state.session_id);
        info!("Signed out: {}", username);
        Ok(())
    }

    /// Sends the staged request through the generation backend. On
    /// success the pair lands in the tenant's log and review begins; on
    /// failure the session returns to idle with nothing recorded.
    pub async fn submit_request(&self, state: &mut SessionState) -> Result<String, SessionError> {
        let username = expect_authenticated(state)?;
        expect_phase(state, Phase::Idle, "generate")?;
        let request = state.pending_input.trim().to_string();
        if request.is_empty() {
            return Err(SessionError::EmptyRequest);
        }

        let arm = state
            .bandit
            .select_arm(&mut rand::thread_rng(), self.epsilon);
        let template = &TEMPLATES[arm];
        debug!("Generating with the {} template for {}", template.name, username);

        state.phase = Phase::AwaitingGeneration;
        let language = state.preferences.favorite_language;
        let generated = self
            .generator
            .generate(
                &request,
                template.pattern,
                language.as_str(),
                state.preferences.temperature,
            )
            .await;
        let code = match generated {
            Ok(code) => code,
            Err(e) => {
                warn!("Generation failed: {}", e);
                state.phase = Phase::Idle;
                return Err(e.into());
            }
        };

        if let Err(e) = self.tenants.append_chat(&username, &request, &code) {
            state.phase = Phase::Idle;
            return Err(e.into());
        }

        state.history.insert(0, ChatEntry::now(&request, &code));
        state.artifact = Some(Artifact {
            code: code.clone(),
            language,
            arm,
        });
        state.feedback_given = false;
        state.pending_input.clear();
        state.phase = Phase::ReviewingResult;
        Ok(code)
    }

    /// Applies a rating to the artifact under review.
    pub fn submit_feedback(
        &self,
        state: &mut SessionState,
        feedback: Feedback,
    ) -> Result<(), SessionError> {
        expect_authenticated(state)?;
        expect_phase(state, Phase::ReviewingResult, "feedback")?;
        let arm = state
            .artifact
            .as_ref()
            .map(|a| a.arm)
            .ok_or(SessionError::NoArtifact)?;
        if self.policy.single_feedback_per_artifact && state.feedback_given {
            return Err(SessionError::FeedbackAlreadyGiven);
        }
        state.bandit.update(arm, feedback.reward());
        state.feedback_score += feedback.reward() as i64;
        state.feedback_given = true;
        debug!("Feedback {} on arm {}", feedback, arm);
        Ok(())
    }

    /// Ends review and returns to idle, ready for the next request.
    pub fn conclude_review(&self, state: &mut SessionState) -> Result<(), SessionError> {
        expect_authenticated(state)?;
        expect_phase(state, Phase::ReviewingResult, "done")?;
        state.artifact = None;
        state.phase = Phase::Idle;
        Ok(())
    }

    /// Runs the artifact under review on the host interpreter. See the
    /// executor module for the safety boundary.
    pub async fn run_artifact(
        &self,
        state: &SessionState,
    ) -> Result<ExecutionReport, SessionError> {
        expect_authenticated(state)?;
        expect_phase(state, Phase::ReviewingResult, "run")?;
        let artifact = state.artifact.as_ref().ok_or(SessionError::NoArtifact)?;
        if artifact.language != CodeLanguage::Python {
            return Err(SessionError::UnsupportedLanguage(artifact.language));
        }
        Ok(self.runner.execute(&artifact.code).await)
    }

    /// Applies new preference values to the session after validation.
    pub fn update_preferences(
        &self,
        state: &mut SessionState,
        prefs: Preferences,
    ) -> Result<(), SessionError> {
        expect_authenticated(state)?;
        prefs.validate()?;
        state.preferences = prefs;
        Ok(())
    }

    /// Writes the session's preferences to the tenant store without
    /// waiting for logout.
    pub fn save_preferences(&self, state: &SessionState) -> Result<(), SessionError> {
        let username = expect_authenticated(state)?;
        self.tenants.set_preferences(&username, &state.preferences)?;
        Ok(())
    }

    /// Clears the session's visible transcript. The stored log is
    /// append-only and keeps every entry.
    pub fn clear_history(&self, state: &mut SessionState) -> Result<(), SessionError> {
        expect_authenticated(state)?;
        state.history.clear();
        Ok(())
    }

    /// Registration timestamp of the signed-in account.
    pub fn account_created_at(&self, state: &SessionState) -> Result<String, SessionError> {
        let username = expect_authenticated(state)?;
        Ok(self.credentials.created_at(&username)?)
    }
}

fn expect_phase(
    state: &SessionState,
    expected: Phase,
    operation: &'static str,
) -> Result<(), SessionError> {
    if state.phase != expected {
        return Err(SessionError::InvalidPhase {
            operation,
            phase: state.phase,
        });
    }
    Ok(())
}

fn expect_authenticated(state: &SessionState) -> Result<String, SessionError> {
    state.username.clone().ok_or(SessionError::NotAuthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FakeGenerator {
        reply: Option<String>,
    }

    #[async_trait]
    impl CodeGenerator for FakeGenerator {
        async fn generate(
            &self,
            _raw_input: &str,
            _template: &str,
            _language: &str,
            _temperature: f64,
        ) -> Result<String, GenerateError> {
            match &self.reply {
                Some(code) => Ok(code.clone()),
                None => Err(GenerateError::Timeout),
            }
        }
    }

    fn controller(dir: &TempDir, reply: Option<&str>, policy: SessionPolicy) -> SessionController {
        let credentials = CredentialStore::open(&dir.path().join("users.sqlite")).unwrap();
        let tenants = TenantStores::open(&dir.path().join("tenants")).unwrap();
        let generator = Arc::new(FakeGenerator {
            reply: reply.map(str::to_string),
        });
        SessionController::new(credentials, tenants, generator, policy).with_epsilon(0.0)
    }

    fn signed_in(controller: &SessionController) -> SessionState {
        let mut state = controller.open_session();
        controller
            .register(&mut state, "alice", "secret123")
            .unwrap();
        state
    }

    async fn generate(controller: &SessionController, state: &mut SessionState, request: &str) {
        state.stage_input(request);
        controller.submit_request(state).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_signs_the_session_in() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let state = signed_in(&ctl);

        assert!(state.is_authenticated());
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.username.as_deref(), Some("alice"));
        assert_eq!(ctl.account_created_at(&state).unwrap().len(), 19);
    }

    #[tokio::test]
    async fn test_register_needs_a_signed_out_session() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);

        let err = ctl.register(&mut state, "bob", "secret123").unwrap_err();
        assert!(matches!(err, SessionError::InvalidPhase { .. }));
    }

    #[tokio::test]
    async fn test_generation_flow() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print('sorted')"), SessionPolicy::default());
        let mut state = signed_in(&ctl);

        state.stage_input("  sort a list  ");
        let code = ctl.submit_request(&mut state).await.unwrap();

        assert_eq!(code, "print('sorted')");
        assert_eq!(state.phase, Phase::ReviewingResult);
        assert!(state.pending_input.is_empty());
        // Greedy fresh bandit picks arm 0
        assert_eq!(state.artifact.as_ref().unwrap().arm, 0);
        assert_eq!(state.history[0].user_input, "sort a list");
    }

    #[tokio::test]
    async fn test_generation_needs_staged_text() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);

        let err = ctl.submit_request(&mut state).await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyRequest));
        assert_eq!(state.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_failed_generation_returns_to_idle_with_nothing_recorded() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, None, SessionPolicy::default());
        let mut state = signed_in(&ctl);

        state.stage_input("sort a list");
        let err = ctl.submit_request(&mut state).await.unwrap_err();

        assert!(matches!(err, SessionError::Generate(GenerateError::Timeout)));
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.artifact.is_none());
        assert!(state.history.is_empty());
        assert_eq!(state.stats().codes_generated, 0);
    }

    #[tokio::test]
    async fn test_feedback_updates_the_bandit() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        generate(&ctl, &mut state, "sort a list").await;

        ctl.submit_feedback(&mut state, Feedback::Excellent).unwrap();

        // 0 + 0.1 * (2 + 0.9 * 0 - 0)
        assert!((state.bandit.values()[0] - 0.2).abs() < 1e-12);
        assert_eq!(state.feedback_score, 2);
        assert_eq!(state.phase, Phase::ReviewingResult);
    }

    #[tokio::test]
    async fn test_repeated_feedback_keeps_updating_by_default() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        generate(&ctl, &mut state, "sort a list").await;

        ctl.submit_feedback(&mut state, Feedback::Excellent).unwrap();
        ctl.submit_feedback(&mut state, Feedback::Excellent).unwrap();

        // 0.2 + 0.1 * (2 + 0.9 * 0.2 - 0.2)
        assert!((state.bandit.values()[0] - 0.398).abs() < 1e-12);
        assert_eq!(state.feedback_score, 4);
    }

    #[tokio::test]
    async fn test_single_feedback_policy_rejects_the_second_rating() {
        let dir = TempDir::new().unwrap();
        let policy = SessionPolicy {
            single_feedback_per_artifact: true,
            ..SessionPolicy::default()
        };
        let ctl = controller(&dir, Some("print(1)"), policy);
        let mut state = signed_in(&ctl);
        generate(&ctl, &mut state, "sort a list").await;

        ctl.submit_feedback(&mut state, Feedback::Excellent).unwrap();
        let err = ctl
            .submit_feedback(&mut state, Feedback::Poor)
            .unwrap_err();

        assert!(matches!(err, SessionError::FeedbackAlreadyGiven));
        assert_eq!(state.feedback_score, 2);
    }

    #[tokio::test]
    async fn test_feedback_outside_review_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);

        let err = ctl
            .submit_feedback(&mut state, Feedback::Good)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidPhase { .. }));
    }

    #[tokio::test]
    async fn test_conclude_review_returns_to_idle() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        generate(&ctl, &mut state, "sort a list").await;

        ctl.conclude_review(&mut state).unwrap();

        assert_eq!(state.phase, Phase::Idle);
        assert!(state.artifact.is_none());
        let err = ctl
            .submit_feedback(&mut state, Feedback::Good)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidPhase { .. }));
    }

    #[tokio::test]
    async fn test_logout_persists_preferences_and_keeps_the_session_id() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        let session_id = state.session_id;

        let prefs = Preferences::new(0.9, 8, CodeLanguage::JavaScript).unwrap();
        ctl.update_preferences(&mut state, prefs.clone()).unwrap();
        ctl.logout(&mut state).unwrap();

        assert_eq!(state.session_id, session_id);
        assert_eq!(state.phase, Phase::Unauthenticated);
        assert!(state.username.is_none());

        ctl.login(&mut state, "alice", "secret123").unwrap();
        assert_eq!(state.preferences, prefs);
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_the_session_signed_out() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        ctl.logout(&mut state).unwrap();

        let err = ctl.login(&mut state, "alice", "not-it").unwrap_err();
        assert!(matches!(err, SessionError::Auth(AuthError::WrongPassword)));
        assert!(!state.is_authenticated());
        assert_eq!(state.phase, Phase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_login_restores_recent_history() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        generate(&ctl, &mut state, "sort a list").await;
        ctl.logout(&mut state).unwrap();

        ctl.login(&mut state, "alice", "secret123").unwrap();

        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].user_input, "sort a list");
    }

    #[tokio::test]
    async fn test_bandit_resets_between_sessions_by_default() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        generate(&ctl, &mut state, "sort a list").await;
        ctl.submit_feedback(&mut state, Feedback::Excellent).unwrap();
        ctl.logout(&mut state).unwrap();

        ctl.login(&mut state, "alice", "secret123").unwrap();
        assert_eq!(state.bandit.values(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_bandit_survives_logout_when_the_policy_keeps_it() {
        let dir = TempDir::new().unwrap();
        let policy = SessionPolicy {
            persist_bandit: true,
            ..SessionPolicy::default()
        };
        let ctl = controller(&dir, Some("print(1)"), policy);
        let mut state = signed_in(&ctl);
        generate(&ctl, &mut state, "sort a list").await;
        ctl.submit_feedback(&mut state, Feedback::Excellent).unwrap();
        ctl.logout(&mut state).unwrap();

        ctl.login(&mut state, "alice", "secret123").unwrap();
        let values = state.bandit.values();
        assert!((values[0] - 0.2).abs() < 1e-12);
        assert_eq!(&values[1..], &[0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_run_rejects_non_python_artifacts() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("int main() {}"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        let prefs = Preferences::new(0.7, 5, CodeLanguage::Cpp).unwrap();
        ctl.update_preferences(&mut state, prefs).unwrap();
        generate(&ctl, &mut state, "a main function").await;

        let err = ctl.run_artifact(&state).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedLanguage(CodeLanguage::Cpp)
        ));
    }

    #[tokio::test]
    async fn test_stats_count_session_visible_work() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);

        generate(&ctl, &mut state, "first").await;
        ctl.submit_feedback(&mut state, Feedback::Good).unwrap();
        ctl.conclude_review(&mut state).unwrap();
        generate(&ctl, &mut state, "second").await;

        let stats = state.stats();
        assert_eq!(stats.codes_generated, 2);
        assert_eq!(stats.feedback_score, 1);
    }

    #[tokio::test]
    async fn test_clear_history_leaves_the_store_untouched() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);
        generate(&ctl, &mut state, "sort a list").await;
        ctl.conclude_review(&mut state).unwrap();

        ctl.clear_history(&mut state).unwrap();
        assert!(state.history.is_empty());

        ctl.logout(&mut state).unwrap();
        ctl.login(&mut state, "alice", "secret123").unwrap();
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_transcript_reads_oldest_first() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);

        generate(&ctl, &mut state, "first").await;
        ctl.conclude_review(&mut state).unwrap();
        generate(&ctl, &mut state, "second").await;

        let inputs: Vec<&str> = state
            .transcript()
            .map(|entry| entry.user_input.as_str())
            .collect();
        assert_eq!(inputs, ["first", "second"]);
    }

    #[tokio::test]
    async fn test_preferences_are_validated_before_applying() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = signed_in(&ctl);

        let bad = Preferences {
            temperature: 1.5,
            speed: 5,
            favorite_language: CodeLanguage::Python,
        };
        let err = ctl.update_preferences(&mut state, bad).unwrap_err();
        assert!(matches!(err, SessionError::Preferences(_)));
        assert_eq!(state.preferences, Preferences::default());
    }

    #[tokio::test]
    async fn test_operations_require_sign_in() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, Some("print(1)"), SessionPolicy::default());
        let mut state = ctl.open_session();

        assert!(matches!(
            ctl.submit_request(&mut state).await.unwrap_err(),
            SessionError::NotAuthenticated
        ));
        assert!(matches!(
            ctl.logout(&mut state).unwrap_err(),
            SessionError::NotAuthenticated
        ));
        assert!(matches!(
            ctl.clear_history(&mut state).unwrap_err(),
            SessionError::NotAuthenticated
        ));
    }
}
