pub mod descriptor;
pub mod record;
pub mod supervisor;
pub mod watch;

pub use descriptor::{PodDescriptor, PodPhase};
pub use supervisor::PodListSupervisor;
