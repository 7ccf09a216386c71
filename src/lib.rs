pub mod record;
pub mod sink;
pub mod bulk;
pub mod client;
pub mod hook;
pub mod registry;
pub mod layer;

pub mod init;
pub mod dsn;
pub mod env;

pub use bulk::{flush_fn, BulkWriter, ClosedWriterError, ErrorHandler, FlushError, FlushHandler, NoErrorHandler};
pub use client::{ClientError, ElasticClient};
pub use hook::{ElasticHook, FireMode, HookError, IndexNameFn};
pub use registry::BulkRegistry;
