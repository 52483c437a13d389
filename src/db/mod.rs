//! Document store access: connection supervision, typed collections and
//! repositories

pub mod connection;
#[cfg(test)]
pub mod memory;
pub mod mongo;
pub mod repository;
pub mod schemas;

pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, EventSink, RetryPolicy, StoreConnector,
    StoreHandle,
};
pub use mongo::{MongoClient, MongoConnector};
pub use repository::{
    MongoMovieRepository, MongoUserRepository, MovieRepository, SharedMovies, SharedUsers,
    UserRepository,
};
