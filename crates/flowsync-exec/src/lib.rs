pub mod contracts;
pub mod controller;
pub mod events;
pub mod extractor;
pub mod processors;
pub mod subprocess;

pub use contracts::*;
pub use controller::*;
pub use events::*;
pub use extractor::*;
pub use processors::*;
pub use subprocess::*;
