//! Domain model (IDs, queue types, scores, worklist entries, callbacks, audit records).
//!
//! ここは純粋な型と関数だけ。I/O は ports 経由で app 層が行う。

pub mod callback;
pub mod checkpoint;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod priority;
pub mod queue_type;
pub mod score;
pub mod state;
pub mod transition;
pub mod worklist;

pub use callback::Callback;
pub use checkpoint::{Candidate, JobCursor, RankKey, RefreshCheckpoint};
pub use errors::{ErrorKind, Result, RouterError};
pub use ids::{AgentId, CallbackId, EntryId, Id, IdMarker, LeadId, TransitionId};
pub use outcome::CallOutcome;
pub use priority::Priority;
pub use queue_type::{classify, EligibilityFacts, QueueType};
pub use score::{Reclassification, ScoreRecord};
pub use state::{CallbackStatus, EntryStatus};
pub use transition::{ConversionEvent, TransitionDraft, TransitionRecord, TransitionSource};
pub use worklist::{ClaimOutcome, ConflictReason, EntryOrigin, WorklistEntry};
