pub mod review_request;

pub use review_request::*;
