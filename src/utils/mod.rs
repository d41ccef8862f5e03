pub mod crypto;
pub mod jsonld;
pub mod serialization;
