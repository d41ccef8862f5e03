pub mod credential_repository;
pub mod document_loader;
