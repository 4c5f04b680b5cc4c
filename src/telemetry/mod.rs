//! Telemetry output: frame assembly, distribution, and the network endpoints.

pub mod distributor;
pub mod frame;
pub mod server;

pub use distributor::{
    DistributorError, DistributorHandle, DistributorStats, FrameDistributor, FrameEncoder,
    JsonFrameEncoder, PublishReport, Subscription,
};
pub use frame::{assemble, FrameEnvelope, FrameInputs, LinkState, LoopTiming, TelemetryFrame};
pub use server::{ServerError, TelemetryServer};
