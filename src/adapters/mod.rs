pub mod postgres;
pub mod webhook;

pub use postgres::PostgresStore;
pub use webhook::WebhookClient;
