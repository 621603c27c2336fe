//! # mailrelay-oauth
//!
//! `OAuth2` Device Authorization Grant credentials for the mail relay.
//!
//! ## Features
//!
//! - **Device flow**: request a grant, show the user code, poll until issued
//! - **Token lifecycle**: cached tokens, refresh exchanges, expiry tracking
//! - **Credential store**: JSON file keyed by client identity
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailrelay_oauth::provider::{MICROSOFT_DEVICE_AUTH_URL, MICROSOFT_TOKEN_URL};
//! use mailrelay_oauth::{CredentialStore, DeviceCodeHandler, OAuthClient, Provider, TokenHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::new("Microsoft", MICROSOFT_DEVICE_AUTH_URL, MICROSOFT_TOKEN_URL)?;
//!     let client = OAuthClient::new("your_client_id", provider)?;
//!     let mut handler = DeviceCodeHandler::new(client)?;
//!     let store = CredentialStore::new("data/credentials.json");
//!
//!     handler.load_credentials(&store).await;
//!
//!     // Prompts for a device code only if nothing usable was stored.
//!     if let Some(token) = handler.get_access_token(false).await {
//!         println!("Authorized: {token}");
//!     }
//!
//!     handler.save_credentials(&store)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Credential states
//!
//! A [`CredentialPair`] carries two expiries:
//!
//! ```text
//!   issued            not_after               ext_not_after
//!     │── usable ────────│── refreshable ─────────│── dead
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod clock;
mod error;
pub mod flow;
pub mod handler;
pub mod provider;
pub mod store;
pub mod token;

pub use error::{Error, Result};
pub use flow::{DeviceAuthorization, DeviceGrant, OAuthClient, TokenEndpoint};
pub use handler::{DeviceCodeHandler, TokenHandler};
pub use provider::Provider;
pub use store::{CredentialStore, StoredCredentials};
pub use token::{AccessToken, CredentialPair, CredentialSet, TokenResponse};
