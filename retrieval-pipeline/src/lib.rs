pub mod answer_retrieval;
pub mod index;
pub mod retriever;
pub mod scoring;
pub mod service;

pub use answer_retrieval::{AnswerModel, AnswerSynthesizer, OpenAiAnswerModel, SynthesisError};
pub use index::{snapshot::IndexSnapshot, IndexBuilder, IndexedCorpus, VerseIndex};
pub use retriever::{build_context, EmptyReason, RetrievalOutcome, RetrievedVerse};
pub use service::{AnswerOutcome, AnswerResult, IndexOrigin, SearchService, SourceRef};
