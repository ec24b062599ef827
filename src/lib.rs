pub mod clock;
pub mod collab;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod slots;
pub mod wal;
