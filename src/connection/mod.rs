//! Connection module - scan, connect, bind, and keep the link alive.
//!
//! [`ConnectionManager`] is the only component that publishes or clears the
//! [`Link`](crate::transport::Link); everything else observes it through a
//! [`LinkSlot`](crate::transport::LinkSlot).

mod manager;
mod state;

pub use manager::ConnectionManager;
pub use state::ConnectionState;
