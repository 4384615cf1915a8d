//! Domain layer: entities, value objects and the ports the application layer
//! talks through. Nothing here performs I/O.

pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod streak;
pub mod user;
pub mod wallet;

pub type UserId = String;
pub type ProductId = String;
