pub mod server;
pub mod server_client;
pub mod server_inbound;

pub use server::Entity as Server;
pub use server_client::Entity as ServerClient;
pub use server_inbound::Entity as ServerInbound;
