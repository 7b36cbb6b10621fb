pub mod extract;
pub mod links;
pub mod markdown;
pub mod metadata;
pub mod pipeline;
pub mod readability;
pub mod selection;
pub mod text;

pub use extract::{Extractor, NullExtractor};
pub use markdown::{HtmdConverter, MarkdownConverter};
pub use pipeline::{Pipeline, PipelineOutput};
