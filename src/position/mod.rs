// SPDX-License-Identifier: Apache-2.0

//! Durable read positions.
//!
//! Positions are keyed by [`FileId`](crate::identity::FileId), not by path,
//! so a renamed file keeps its place. The store is loaded once at startup and
//! written back in full, atomically, at most once per write interval.

mod record;
mod serializer;
mod store;

pub use record::{PositionRecord, epoch_seconds, now_epoch_seconds};
pub use serializer::{RecordSerializer, parse_record, serialize_record};
pub use store::{Association, PositionStore};
