//! Body-transformer pipeline (spec §4.4): an optional external process that
//! rewrites the origin response body, with output re-chunked for the
//! client.

pub mod child;
pub mod chunked;
pub mod stage;

pub use child::{CommandStatus, TransformChild};
pub use stage::{TransformInterest, TransformStage};
