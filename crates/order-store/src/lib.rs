pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod repository;

pub use error::{RepositoryError, Result};
pub use memory::InMemoryOrderRepository;
pub use postgres::PostgresOrderRepository;
pub use records::{QuarantinedOrder, UpsertOutcome};
pub use repository::{OrderRepository, OrderRepositoryExt};
