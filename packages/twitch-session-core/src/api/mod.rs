//! REST client for the Twitch identity and Helix services.
//!
//! Identity endpoints (`id.twitch.tv`) validate and revoke tokens; the Helix
//! users endpoint returns the profile of the token's owner.

mod client;
mod error;

pub use client::{TokenValidation, TwitchClient, TwitchUser};
pub use error::ApiError;
