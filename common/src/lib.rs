pub mod assignment;
pub mod batch;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod order;
pub mod projection;
pub mod rfid;
pub mod status;
pub mod transition;

pub use error::TrackerError;
