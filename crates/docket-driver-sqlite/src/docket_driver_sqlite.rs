//! SQLite physical connections for the Docket connection pool

mod connection;
mod factory;

#[cfg(test)]
mod tests;

pub use connection::SqliteConnection;
pub use factory::SqliteConnectionFactory;
