pub mod file_source;
pub mod http_source;

pub use file_source::FileSource;
pub use http_source::HttpSource;
