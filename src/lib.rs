pub mod clock;
pub mod config;
pub mod drainer;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod rent;
pub mod sql;
pub mod wal;
pub mod wire;
