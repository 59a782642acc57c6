pub mod compress;
pub mod connector;
pub mod detect;
mod error;
pub mod external;
pub mod native;
pub mod process;
pub mod sql;
pub mod sqlite;
pub mod statements;
#[cfg(test)]
mod testing;

pub use connector::{collect_stats, DatabaseConnector, DatabaseServer, SqlValue};
pub use detect::{AvailableMethods, MethodDetector};
pub use error::DumpError;
pub use external::{ExternalExporter, ExternalRestorer, ToolPaths};
pub use native::{Dialect, ExportOptions, ExportSummary, NativeExporter};
pub use process::{Invocation, ProcessOutput, ProcessRunner, SystemRunner};
pub use sql::Flavor;
pub use sqlite::{SqliteConnector, SqliteServer};
pub use statements::{replay_file, StatementReader};
