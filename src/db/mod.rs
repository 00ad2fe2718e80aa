pub use pool::*;
pub use system_config::PgConfigRepository;

pub mod pool;
pub mod system_config;
