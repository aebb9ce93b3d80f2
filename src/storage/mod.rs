pub mod mock;
pub mod postgres;
pub mod traits;

pub use mock::MockStorage;
pub use postgres::PostgresStorage;
pub use traits::Storage;
