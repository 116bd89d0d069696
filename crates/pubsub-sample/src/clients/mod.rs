pub mod hello_client;

pub use hello_client::HelloClient;
