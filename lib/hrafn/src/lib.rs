pub mod codec;
pub mod constants;
pub mod distribute;
pub mod error;
pub mod gate;
pub mod gen;
pub mod index;
pub mod io;
pub mod merge;
pub mod net;
pub mod rewrite;
pub mod runtime;
pub mod sort;
pub mod stats;
pub mod transport;
pub mod verify;

pub use error::PipelineError;
pub use gate::ProgressGate;
pub use index::IndexRec;
pub use runtime::{run_local, run_rank, SortConfig};
pub use transport::{LocalMesh, Transport};
