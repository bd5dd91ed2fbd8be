//! Adapters binding the rotation pipeline to the cluster, the node filesystem
//! and the event stream

mod cluster;
mod events;
mod mounted_files;
mod secrets;
mod store;

pub use cluster::*;
pub use events::*;
pub use mounted_files::*;
pub use secrets::*;
pub use store::*;
