pub mod conversions;
pub mod jobs;
