//! Answer quality scoring and grounding validation.

pub mod confidence;
pub mod quality;
pub mod validation;

pub use confidence::compute_confidence;
pub use quality::QualityScorer;
pub use validation::AnswerValidator;
