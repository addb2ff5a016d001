mod ask;
mod config;
mod search;
mod serve;
mod status;

pub use ask::AskArgs;
pub use config::ConfigCommand;
pub use search::SearchArgs;
pub use serve::ServeArgs;

pub use ask::handle_ask;
pub use config::handle_config;
pub use search::handle_search;
pub use serve::handle_serve;
pub use status::handle_status;
