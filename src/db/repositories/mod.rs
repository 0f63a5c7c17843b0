//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the queries for a specific entity.

pub mod post;
pub mod session;
pub mod taxonomy;
pub mod user;

pub use post::{PostRepository, SqlxPostRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use taxonomy::{SqlxTaxonomyRepository, TaxonomyRepository};
pub use user::{SqlxUserRepository, UserRepository};
