pub mod idempotency;
pub mod mutation;
pub mod obj_service;

pub use idempotency::IdempotencyCache;
pub use mutation::{
    DeleteManyRequest, DeleteResult, MutationOutcome, MutationPipeline, SetManyRequest, UpdateManyRequest, UpdateResult,
};
pub use obj_service::{GetManyRequest, HealthStatus, ObjService};
