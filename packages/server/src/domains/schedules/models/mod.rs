pub mod arm;
pub mod entry;
pub mod reward;
pub mod time_slot;

pub use arm::*;
pub use entry::*;
pub use reward::*;
pub use time_slot::*;
