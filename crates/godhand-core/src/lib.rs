//! Shared domain model for the GodHand automation host: actions, results,
//! lifecycle events, the wire protocol and the contracts of the external
//! collaborators (intent resolver, action backend, history store).

pub mod action;
pub mod clock;
pub mod errors;
pub mod events;
pub mod ids;
pub mod mode;
pub mod protocol;
pub mod snapshot;
pub mod traits;

pub use action::{Action, ActionKind, ActionResult, ActionSpec, Parameters};
pub use errors::{BackendError, CompileError, HistoryStoreError};
pub use events::{EventRecord, ExecEvent, SessionEvent};
pub use ids::SessionId;
pub use mode::ExecutionMode;
pub use snapshot::SessionSnapshot;
