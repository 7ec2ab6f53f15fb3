//! Ambient plumbing shared between the session core and any transport binary built on top of it:
//! structured logging, in the idiom the `versed` server boots at startup (§6 ADDED).
pub mod logging;
