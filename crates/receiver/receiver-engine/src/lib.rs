mod handler;
mod metrics;
mod pipeline;
mod receiver;
mod single;

pub use handler::{Handler, HandlerSettings, ReplyPath, reply_buffer};
pub use metrics::{HandlerMetrics, HandlerSnapshot, ReceiverMetrics, ReceiverSnapshot};
pub use pipeline::{ReceivePipeline, StartError};
pub use receiver::{Poll, Receiver};
pub use single::SingleThreadReceiver;
