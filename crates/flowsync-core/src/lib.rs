pub mod config;
pub mod error;
pub mod merge;
pub mod node;
pub mod patch;
pub mod state;
pub mod store;

pub use config::*;
pub use error::*;
pub use merge::*;
pub use node::*;
pub use patch::*;
pub use state::*;
pub use store::*;
