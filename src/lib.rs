pub mod command;
pub mod compactor;
pub mod config;
pub mod ledger;
pub mod limits;
pub mod locks;
pub mod model;
pub mod observability;
pub mod registry;
pub mod resolver;
pub mod wal;
pub mod wire;
