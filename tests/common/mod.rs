#![allow(dead_code)]

#[path = "../../src/test_support.rs"]
mod test_support;

pub use test_support::{write_dicom, Element};
