// Copyright 2023 SuperFundrs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # SuperFundrs Client
//!
//! The embeddable session core of the SuperFundrs account-abstraction
//! client. It owns everything between "the user clicked sign in" and
//! "the relay acknowledged the transaction": the social-login signing
//! session, the smart-account selection (existing or counterfactual), the
//! organization context derived from the session email or the page URL,
//! the single-slot meta-transaction relay, and a balance poller.
//!
//! The embedder supplies the externals as capability traits (an
//! [`auth::IdentityProvider`], a [`contracts::ChainReader`], a
//! [`relay::BundleSigner`] and a [`relay::Relay`]) and drives everything
//! through a shared [`context::SessionContext`].
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The signing session: login, logout, resume, email relabeling.
pub mod auth;
/// Chain registry and deployment parameters, loaded from files and the
/// environment.
pub mod config;
/// The shared session state, its epoch guard and the event bus.
pub mod context;
/// Contract bindings and the read-only chain access trait.
pub mod contracts;
/// Crate errors.
pub mod error;
/// Organization identity, URL hints and on-chain organization state.
pub mod org;
/// Fixed-interval chain polling.
pub mod polling;
/// Diagnostic probe events, for machine consumption.
pub mod probe;
/// Meta-transaction bundling, signing and relaying.
pub mod relay;
/// Smart-account selection and counterfactual address derivation.
pub mod safe;
/// The background organization sync task.
pub mod service;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::SuperfundrsConfig;
pub use context::{SessionContext, SessionEvent};
pub use error::{Error, Result};
