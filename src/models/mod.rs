pub mod snapshot;
pub mod title;
pub mod trend;
