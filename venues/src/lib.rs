//! Concrete venue adapters.
//!
//! Two adapters are provided, chosen to span the shapes a venue's
//! adapter contract has to cover: `lighter` ships its own WebSocket
//! client for order-book and order-update streaming, while `grvt` is
//! REST-poll based with no persistent stream connection.

pub mod grvt;
pub mod lighter;

use grid_core::registry::VenueRegistry;

/// Registers every adapter in this crate under its venue name.
pub fn register_all(registry: &mut VenueRegistry) {
    lighter::register(registry);
    grvt::register(registry);
}
