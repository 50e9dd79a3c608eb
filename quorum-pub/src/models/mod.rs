//! Data models for quorum-pub

pub mod campaign;
pub mod element;
pub mod process;
pub mod task;

pub use campaign::{Campaign, CampaignMode};
pub use element::{Element, ExternalTypeMapping, TextOrientation};
pub use process::{LogEntry, LogLevel, Process, ProcessState, PROCESS_MODE_CORPUS_EXPORT};
pub use task::{Annotation, AnnotationState, AssignmentState, Task, UserTask};
