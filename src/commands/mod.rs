//! CLI commands implementation

pub mod datasets;
pub mod delete;
pub mod init;
pub mod status;
pub mod sync;

pub use datasets::*;
pub use delete::*;
pub use init::*;
pub use status::*;
pub use sync::*;
