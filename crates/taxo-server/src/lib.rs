//! taxo-server: REST surface for the taxonomy kernel.

pub mod error;
pub mod handlers;
pub mod router;

pub use error::AppError;
pub use router::build_router;
