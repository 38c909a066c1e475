pub mod post;
pub mod revision;
pub mod status;

pub use post::*;
pub use revision::*;
pub use status::*;
