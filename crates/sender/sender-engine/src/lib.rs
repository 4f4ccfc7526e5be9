mod distribution;
mod metrics;
mod pacer;
mod pipeline;
mod sender;

pub use distribution::{DistributionError, DistributionTable};
pub use metrics::{SenderMetrics, SenderSnapshot};
pub use pacer::RatePacer;
pub use pipeline::{SendPipeline, StartError, split_budget, split_rate};
pub use sender::{Sender, SenderSettings, Step};
