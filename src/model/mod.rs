pub mod label_mapping;
pub mod network;
