//! PortBroker: an Anthropic/OpenAI compatible gateway in front of
//! OpenAI-compatible providers.

pub mod api_proxy;

pub use api_proxy::{create_router, run_server, run_server_from_env, AppState, GatewayConfig};
