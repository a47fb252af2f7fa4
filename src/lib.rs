//! `listrelay` — a mailing-list relay and moderation pipeline.
//!
//! Messages dropped into a queue directory are resolved against the list
//! store, checked by the moderation gate, and sent one personalized copy
//! per recipient. A per-message tracking file records every step so an
//! interrupted run resumes without duplicate deliveries.

pub mod config;
pub mod error;
pub mod lists;
pub mod mime;
pub mod model;
pub mod moderation;
pub mod relay;
pub mod tracking;
