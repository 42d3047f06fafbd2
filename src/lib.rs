pub mod appstore;
pub mod database;
pub mod htmltext;
pub mod limiter;
pub mod logging;
pub mod network;
pub mod playstore;

pub use database::{Database, StoreKind};
pub use network::{FetchError, HttpClient};
