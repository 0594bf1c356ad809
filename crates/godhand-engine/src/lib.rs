//! Orchestration core: instruction compiler, action executor and session
//! manager.

#![deny(unsafe_code)]

pub mod backend;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod mock;
pub mod resolver;
pub mod session;

pub use backend::LocalBackend;
pub use compiler::{Compiler, MAX_REPEAT};
pub use error::SessionError;
pub use executor::{BatchOutcome, BatchStatus, Executor, ExecutorConfig};
pub use resolver::RuleResolver;
pub use session::{
    ConfirmOutcome, Session, SessionConfig, SessionManager, SubmitOutcome, SyncOutcome,
};
