pub mod analytics;
pub mod intent;
pub mod process_info;
pub mod project;
pub mod share;

pub use analytics::*;
pub use intent::*;
pub use process_info::*;
pub use project::*;
pub use share::*;
