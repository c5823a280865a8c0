//! Run reports and artifact naming

pub mod naming;
mod writer;

pub use writer::ReportWriter;
