pub mod generator;
pub mod orchestrator;
pub mod shaper;
pub mod summarizer;

pub use generator::{GenerationError, SqlGenerator};
pub use orchestrator::{Explanation, Pipeline, PipelineError, PipelineState, PipelineStatus, QueryTurn};
pub use shaper::{ColumnStats, ResultShaper, ShapedResult};
pub use summarizer::{ResultSummarizer, SummarizationError};
