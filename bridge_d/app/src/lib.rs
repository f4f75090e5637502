//! Host application for the native call bridge

pub mod fixture;
pub mod plugins;
pub mod report;
