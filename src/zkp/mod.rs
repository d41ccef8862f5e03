pub mod proof_verification;
pub mod pub_signals;
pub mod query;
