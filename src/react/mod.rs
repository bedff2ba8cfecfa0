//! 认知层：Worker、Evaluator、ProfileExtractor 与控制循环

pub mod evaluator;
pub mod events;
pub mod extractor;
pub mod loop_;
pub mod worker;

pub use evaluator::{format_conversation, Evaluator, EvaluatorVerdict};
pub use events::{DisplayMessage, DisplayRole, HistorySnapshot, TurnOutcome, TurnStream};
pub use extractor::{ExtractedFact, ProfileExtractor, ProfileUpdate};
pub use loop_::TurnSession;
pub use worker::{build_system_prompt, Worker, WorkerContext};
