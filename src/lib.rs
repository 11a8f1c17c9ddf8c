// Real-time chat client core: socket transport, REST resource client and the
// conversation store that reconciles both into one state.
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod transport;

pub use api::{HttpResourceClient, ResourceClient};
pub use config::ClientConfig;
pub use error::{ApiError, TransportError};
pub use models::*;
pub use store::{ConversationStore, Snapshot, StoreSettings};
pub use transport::{ReadyState, Transport, TransportConfig};
