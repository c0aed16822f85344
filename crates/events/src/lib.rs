//! Progress fan-out for conversion jobs.
//!
//! [`ProgressBroadcaster`] maps a job id to the set of live subscriber
//! channels and pushes every state change to all of them. Delivery is
//! best-effort: channels found closed at send time are pruned, and a dead
//! subscriber never blocks the others.

pub mod broadcaster;

pub use broadcaster::{BroadcastError, ProgressBroadcaster, SubscriberChannel};
