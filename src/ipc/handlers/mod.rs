pub mod backup;
pub mod core;
pub mod exports;
pub mod grading;
pub mod result_sheet;
pub mod scores;
pub mod session;
pub mod setup;
pub mod stats;
