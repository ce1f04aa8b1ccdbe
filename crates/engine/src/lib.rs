//! Session orchestration: the prompt-style bandit, its templates, the
//! session state machine and the snippet runner.

pub mod bandit;
pub mod executor;
pub mod prompts;
pub mod session;

pub use bandit::PromptBandit;
pub use executor::{ExecutionReport, PythonRunner};
pub use session::{
    Artifact, Phase, SessionController, SessionError, SessionPolicy, SessionState, SessionStats,
};
