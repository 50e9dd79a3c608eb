//! External services used by the publication engine

pub mod corpus_client;

pub use corpus_client::{
    ArkindexClient, CorpusApi, CorpusElementType, CorpusError, CorpusInfo, CreatedObject,
    EntityType, MlClass, NewChildElement, NewClassification, NewElement, NewEntityType,
    NewTranscription, NewTranscriptionEntity,
};
