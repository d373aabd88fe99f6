pub mod address;
pub mod groups;
pub mod lifecycle;
pub mod session_manager;


// Re-export the modules here for easy import elsewhere.
pub use address::*;
pub use groups::*;
pub use lifecycle::*;
pub use session_manager::*;
