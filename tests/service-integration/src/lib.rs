//! In-process harness for exercising the tracker node over HTTP.

pub mod harness;

use std::time::Duration;

use chrono::Utc;
use pharmachain_common::batch::NewBatch;
use pharmachain_common::rfid::RfidTag;

/// Tag printed on the packaging of the batches in these tests.
pub const TAG: &str = "e2801170200014a1b2c3d4e5";

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn tag() -> RfidTag {
    RfidTag::from_hex(TAG).expect("test tag is valid hex")
}

pub fn new_batch(quantity: u32) -> NewBatch {
    NewBatch {
        product_name: "Amoxicillin 500mg".into(),
        rfid_tag: tag(),
        quantity,
        expiry_date: Utc::now() + chrono::Duration::days(365),
    }
}
