// Pipeline domains

pub mod accounts;
pub mod audit;
pub mod generation;
pub mod posts;
pub mod publishing;
pub mod reviews;
pub mod schedules;
