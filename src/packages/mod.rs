//! Host package batches: snaps and debs installed/removed as a unit.

mod deb;
mod snap;

pub use deb::{Deb, DebHandler};
pub use snap::SnapHandler;
