pub mod state_client;
