//! Backend access
//!
//! Architecture follows the project pattern (trait + impl + mock):
//! - `Backend` trait: async interface to the entity REST API
//! - `HttpBackend`: real implementation over reqwest
//! - `MockBackend`: in-memory backend with call log and failure injection
//! - `SessionProvider`: credentials attached to every request

pub mod http;
pub mod mock;
pub mod session;
pub mod traits;

pub use http::HttpBackend;
pub use mock::MockBackend;
pub use session::{AnonymousSession, Credentials, SessionProvider, StaticSession};
pub use traits::{Backend, BackendError};
