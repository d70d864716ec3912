//! CLI command implementations

pub mod assess;
pub mod budget;
pub mod cache;
pub mod config;

pub use assess::execute as assess;
pub use budget::execute as budget;
pub use cache::execute as cache;
pub use config::execute as config;
