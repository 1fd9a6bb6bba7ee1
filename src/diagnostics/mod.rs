pub mod render;
pub mod sink;

pub use render::{render_image, render_map, Colormap};
pub use sink::{DiagnosticSink, Event, FileSink, HistogramRecord, RecordingSink, HISTOGRAM_BUCKETS};
