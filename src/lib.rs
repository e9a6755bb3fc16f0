pub mod engines;
pub mod proto;

pub use engines::FlatStore;
pub use engines::KvsError;
pub use engines::LoadStats;
pub use engines::Result;
