//! Application services: the fan-out engine, the feed read path, and the
//! boundary operations exposed over HTTP.

pub mod error;
pub mod fanout;
pub mod feed;
pub mod follows;
pub mod metrics;
pub mod posts;
pub mod repos;
