pub mod assessment;
pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod personality;
pub mod profile;
pub mod session;
pub mod stats;
pub mod trust;

pub use assessment::*;
pub use config::*;
pub use error::*;
pub use graph::*;
pub use orchestrator::*;
pub use personality::*;
pub use profile::*;
pub use session::*;
