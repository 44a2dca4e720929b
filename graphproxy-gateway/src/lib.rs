pub mod connection;
pub mod gate;
pub mod realtime;
pub mod register;
pub mod request;
pub mod upstream;
pub mod worker;

pub use gate::RequestGate;
pub use realtime::RealtimeEndpoint;
pub use request::HttpRequest;
pub use upstream::GraphClient;
pub use worker::SharedState;
