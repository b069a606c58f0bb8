//! Question generation over published versions.
//!
//! Publishing enqueues a `generate_questions` job; [`QuestionGenerationRunner`]
//! executes it against the version snapshot, going through
//! [`GenerationCache`] so identical text and parameters reach the model once
//! per owner.

pub mod cache;
pub mod questions;
pub mod runner;

pub use cache::{fingerprint, CachedQuestions, GenerationCache};
pub use questions::{
    Difficulty, LlmQuestionGenerator, Question, QuestionGenerator, QuestionParams, QuestionType,
    MAX_QUESTION_COUNT,
};
pub use runner::{GenerationJobParams, GenerationOutcome, QuestionGenerationRunner};
