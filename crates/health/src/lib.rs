pub mod cache;
pub mod oracle;
pub mod probe;
pub mod server;

pub use oracle::{OracleSettings, ReadinessOracle};
pub use probe::Prober;
