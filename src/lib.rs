//! Virtual pet core: bounded stats, decay, actions, persistence
//! reconciliation and the cosmetic shop.

pub mod batch;
pub mod config;
pub mod error;
pub mod model;
pub mod persist;
pub mod remote;
pub mod rest;
pub mod scheduler;
pub mod session;
pub mod shop;
pub mod sim;
pub mod stats;
pub mod storage;

pub use error::{PetError, Severity};
pub use model::{ActionKind, PetState, PurchasedItem, ShopItem, UserId};
pub use session::{Backends, Session, SessionOptions};
