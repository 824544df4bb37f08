//! # Sonar Common Library
//!
//! Shared code for the Sonar playback crates:
//! - Error types
//! - Event types and the EventBus (typed topic publish/subscribe)
//! - Gain envelopes for linear fade-in / fade-out
//! - Configuration file resolution and logging configuration

pub mod config;
pub mod envelope;
pub mod error;
pub mod events;

pub use envelope::GainEnvelope;
pub use error::{Error, Result};
pub use events::{EventBus, Lifecycle, PlaybackState, SoundEvent, SubscriptionId, Topic};
