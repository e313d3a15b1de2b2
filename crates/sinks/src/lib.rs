pub mod media_queue;
pub mod page_sink;

pub use media_queue::{AnalysisSettings, BoundedMediaQueue};
pub use page_sink::{ChannelPageSink, PageWriter};
