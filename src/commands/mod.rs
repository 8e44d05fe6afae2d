pub mod console;
pub mod intent;
pub mod process;
pub mod project;

pub use console::*;
pub use intent::*;
pub use process::*;
pub use project::*;
