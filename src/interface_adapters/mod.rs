// Interface adapters: wire protocol, transports, stores, and admin HTTP.

pub mod http;
pub mod inbound;
pub mod net;
pub mod protocol;
pub mod state;
pub mod store;
pub mod topic_hub;
