mod error;
pub mod mesh;
pub mod redact;
pub mod role;
pub mod scan;
pub mod status;

pub use error::{Result, TopologyError};
pub use mesh::{
    MeshFetch, MeshRecord, MeshSnapshot, MeshSource, SnapshotOrigin, StaticMeshSource,
    TailscaleCli,
};
pub use redact::{redact, Redactor};
pub use role::{infer_role, RoleClassifier};
pub use scan::PortScanner;
pub use status::{coerce_online, default_nodes, StatusAggregator, TopologyOutcome};
