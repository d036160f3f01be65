pub mod class_builder;
pub mod class_file;
pub mod code;
pub mod coerce;
pub mod method_builder;
