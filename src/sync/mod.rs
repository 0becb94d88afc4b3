//! Synchronisation layer
//!
//! - `FetchScheduler`: deduplicated reads, staleness checks, polling and focus refetch
//! - `InvalidationBroadcaster`: maps a mutated entity type to its dependent keys
//! - `MutationCoordinator`: optimistic create/update/delete with exact rollback

mod invalidation;
mod mutation;
mod scheduler;

pub use invalidation::{dependents, Invalidation, InvalidationBroadcaster, InvalidationScope};
pub use mutation::{
    CommittedMutation, IdleMutation, Mutation, MutationCoordinator, MutationError,
    MutationOptions, MutationOutcome, MutationPhase, OptimisticMutation, PendingMutation,
    RolledBackMutation, TEMP_ID_PREFIX,
};
pub use scheduler::{
    FetchError, FetchResult, FetchScheduler, PollHandle, PollOptions, SchedulerConfig,
    TickSummary, AGGREGATE_SOURCES,
};
