//! # tandem-queue
//!
//! Message-queue abstraction for the tandem migration engine: producer and
//! consumer traits plus an in-process bus with consumer groups, committed
//! offsets and at-least-once redelivery.

pub mod bus;
pub mod error;
pub mod traits;

pub use bus::{BusSubscriber, InProcessBus};
pub use error::{QueueError, Result};
pub use traits::{Consumer, Delivery, Producer};
