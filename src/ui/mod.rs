//! Discord presentation: embeds for session notifications and queue listings.

pub mod embeds;
