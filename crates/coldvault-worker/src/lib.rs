//! Demand scheduling and job execution.
//!
//! The pieces compose bottom-up: [`BufferedResourceManager`] bounds
//! concurrent work with a semaphore and an overflow queue; pull
//! subscribers request upstream items only when capacity is actually free;
//! job runners turn an item stream into a monitored, awaitable run; and
//! [`BacklogFeed`] couples a consumer's demand signal to backing-store
//! refill queries so the pipeline stays fed without unbounded buffering.

pub mod feed;
pub mod job;
pub mod monitor;
pub mod pull;
pub mod resource;
pub mod wrappers;

pub use feed::{BacklogFeed, BacklogSource};
pub use job::{FanOutJobRunner, JobHandler, JobRunner, JobSummary};
pub use monitor::{JobContext, JobCounters, JobMonitorRegistry};
pub use pull::{demand_channel, DemandHandle, PullSubscriber, SpillingPullSubscriber};
pub use resource::{BufferedResourceManager, ResourceHandler, ResourceManager, Submission, TaskOutcome};
pub use wrappers::{PriorityWrapper, StageResult};
