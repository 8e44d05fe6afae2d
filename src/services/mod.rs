pub mod analytics;
pub mod dependency_resolver;
pub mod log_hub;
pub mod process_manager;
pub mod project_files;
pub mod share_registry;
pub mod supervisor;

pub use analytics::*;
pub use dependency_resolver::*;
pub use log_hub::*;
pub use process_manager::*;
pub use project_files::*;
pub use share_registry::*;
pub use supervisor::*;
