// HTTP routes
pub mod health;
pub mod verify_links;

pub use health::*;
pub use verify_links::*;
