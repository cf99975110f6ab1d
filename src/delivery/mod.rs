// Delivery module
// Gets tracker events to every configured scrobbling service

pub mod dispatcher;
pub mod pipeline;

pub use dispatcher::Dispatcher;
pub use pipeline::DeliveryPipeline;
