/*!
 * Quasar - distributed objects on a process grid
 *
 * Treat one object instance per worker as a single handle:
 * - method calls, attribute reads and writes fan out to every instance
 * - results come back as a tuple, a consensus value, a cached constant or a chunked array
 * - workers are arranged as an N-dimensional Cartesian grid
 * - array blocks are placed on, and computed by, the worker owning their grid point
 *
 * The worker pool itself sits behind `quasar_core_interface::TaskExecutor`;
 * `quasar_local::LocalCluster` provides an in-process one.
 */

pub mod aggregate;
pub mod array;
pub mod comm;
pub mod config;
pub mod error;
pub mod handles;
pub mod logging;
pub mod object;
pub mod placement;
pub mod proxy;
pub mod session;
pub mod topology;

// Re-export commonly used types
pub use aggregate::{aggregate, consensus, Output, ResultKind};
pub use array::{BlockRef, ChunkedArray};
pub use comm::{Comm, CommKey};
pub use config::{LogLevel, SessionConfig};
pub use error::{ErrorCategory, QuasarError, Result};
pub use handles::{DispatchState, HandleSet};
pub use object::{construct, DistributedInstance, Instance, LocalInstance, ObjectInterface};
pub use placement::{ArraySpec, BuildOptions};
pub use proxy::{dispatch, Arg, CallArgs, CartesianProxy, Dispatched, Operation};
pub use session::{Session, WorkerSelection};
pub use topology::{GridKey, GridTopology};

pub use quasar_core_interface::{
    Args, Block, Class, DType, HandleId, ObjectRef, RemoteError, RemoteObject, TaskExecutor, Value,
    WorkerId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
