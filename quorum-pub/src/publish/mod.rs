//! Annotation aggregation and publication
//!
//! A run walks the tasks of one campaign, reduces the latest annotations of
//! each task to confidence-scored records (see [`aggregators`]), sends them to
//! the corpus and flags the annotations as published once every record of
//! the task made it. EntityForm campaigns may then concatenate child results
//! onto parent elements ([`concatenation`]).

pub mod aggregators;
pub mod concatenation;
pub mod confidence;
pub mod context;
pub mod coordinator;
pub mod diagnostics;
pub mod entity_order;
pub mod grouping;
pub mod type_resolver;

pub use context::RunContext;
pub use coordinator::{PreparedRun, PublicationCoordinator, RunReport, TaskOutcome};

/// Stands in for empty text, which the corpus refuses
pub const EMPTY_SET_CHARACTER: &str = "∅";

/// Tasks read per database round trip
pub const CHUNK_SIZE: usize = 5000;

/// Payload about to be sent to the corpus, with its confidence
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord<P> {
    pub payload: P,
    pub confidence: f64,
}
