pub mod jwz;
pub mod packer;
