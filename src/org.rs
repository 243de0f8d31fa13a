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
//
//! Organization session state.
//!
//! An organization is targeted either through the authenticated email
//! (`sf.admin@<domain>` marks the domain's admin) or through an `sf=` /
//! `org=` URL query parameter, and its on-chain address, descriptive info
//! and proposals-allowed flag are fetched from the registry best-effort:
//! last known good values stay visible while a refresh is in flight or
//! failing.

use ethers::types::Address;

use crate::context::SessionContext;
use crate::contracts::ChainReader;
use crate::error::Result;

/// The email local-part that marks an organization admin. The domain part
/// of such an email is the organization id.
pub const ADMIN_LOCAL_PART: &str = "sf.admin";

/// The organization identity derived from an email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgIdentity {
    /// The organization id (the email domain), empty for non-admins.
    pub org_id: String,
    /// Whether the email claims the admin role for `org_id`.
    pub is_admin: bool,
}

/// Split an email on `@` and derive the organization identity from it.
///
/// Only the exact local-part [`ADMIN_LOCAL_PART`] grants the admin flag;
/// everything else, including emails without an `@`, derives an empty org
/// id. Malformed input never fails.
pub fn derive_org_id(email: &str) -> OrgIdentity {
    match email.split_once('@') {
        Some((ADMIN_LOCAL_PART, domain)) if !domain.is_empty() => {
            OrgIdentity {
                org_id: domain.to_string(),
                is_admin: true,
            }
        }
        _ => OrgIdentity {
            org_id: String::new(),
            is_admin: false,
        },
    }
}

/// An organization id supplied through the page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgHint {
    /// The organization id to pin for this session.
    pub org_id: String,
}

impl OrgHint {
    /// Parse an organization hint out of a URL query string (with or
    /// without the leading `?`). `sf=<id>` is preferred, `org=<id>` is
    /// accepted as well.
    pub fn from_query(query: &str) -> Option<Self> {
        let query = query.trim_start_matches('?');
        let mut fallback = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "sf" => {
                    return Some(Self {
                        org_id: value.into_owned(),
                    })
                }
                "org" => fallback = Some(value.into_owned()),
                _ => {}
            }
        }
        fallback.map(|org_id| Self { org_id })
    }
}

/// Apply a URL hint to the session: the org id is pinned for the whole
/// session and takes precedence over any email-derived value, but it never
/// grants the admin flag (an arbitrary visitor cannot claim admin via URL).
pub fn apply_org_hint(ctx: &SessionContext, hint: &OrgHint) {
    ctx.pin_org_id(&hint.org_id);
    tracing::debug!("Pinned organization id from URL: {}", hint.org_id);
    ctx.emit(crate::context::SessionEvent::OrgHintApplied);
}

/// Descriptive on-chain info of an organization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgInfo {
    /// The organization id as stored in the registry.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Whether the organization currently accepts proposals.
    pub proposals_allowed: bool,
    /// Ids of the proposals raised so far.
    pub proposals: Vec<u64>,
}

/// The organization slice of the session state, owned by
/// [`SessionContext`].
#[derive(Debug, Clone, Default)]
pub struct OrgState {
    /// The targeted organization id, if any.
    pub org_id: Option<String>,
    /// Whether the session email claims the admin role. Never derived from
    /// anything but the email local-part.
    pub is_admin: bool,
    /// Whether `org_id` was pinned through the URL.
    pub url_pinned: bool,
    /// The organization contract address. `None` until fetched, and `None`
    /// when the registry has no entry for `org_id`.
    pub org_address: Option<Address>,
    /// Descriptive info. `None` if and only if the organization has not
    /// been created on-chain yet.
    pub info: Option<OrgInfo>,
    /// The email this state was derived from.
    pub email: String,
}

impl OrgState {
    /// Whether proposals are currently allowed. An organization that does
    /// not exist on-chain never allows proposals.
    pub fn proposals_allowed(&self) -> bool {
        self.info
            .as_ref()
            .map(|info| info.proposals_allowed)
            .unwrap_or(false)
    }
}

/// Refresh the organization context from the chain, best-effort.
///
/// Reads the registry for the organization address; a non-zero address is
/// followed by the descriptive info and the proposals-allowed flag. All
/// results are applied in one atomic update guarded by the epoch captured
/// before the first read, so a chain switch or logout that happens while a
/// read is in flight makes the whole refresh a no-op. Read failures are
/// logged and leave the previous values in place.
pub async fn refresh(ctx: &SessionContext, reader: &dyn ChainReader) {
    let org_id = match ctx.org().org_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            tracing::trace!("No organization targeted, nothing to refresh");
            return;
        }
    };
    let epoch = ctx.epoch();
    match fetch_org(reader, &org_id).await {
        Ok((org_address, info)) => {
            let created = info.is_some();
            if ctx.apply_org_refresh(epoch, org_address, info) {
                tracing::event!(
                    target: crate::probe::TARGET,
                    tracing::Level::TRACE,
                    kind = %crate::probe::Kind::Sync,
                    %org_id,
                    %created,
                );
            } else {
                tracing::trace!(
                    "Discarding stale org info for ({})",
                    org_id
                );
            }
        }
        Err(e) => {
            // best-effort: keep whatever we knew before.
            tracing::warn!("Failed to refresh org info for ({}): {}", org_id, e);
        }
    }
}

async fn fetch_org(
    reader: &dyn ChainReader,
    org_id: &str,
) -> Result<(Option<Address>, Option<OrgInfo>)> {
    let address = reader.org_address(org_id).await?;
    if address == Address::zero() {
        // not created on-chain yet.
        return Ok((None, None));
    }
    let raw = reader.org_info(org_id).await?;
    let proposals_allowed = reader.proposals_allowed(address).await?;
    let info = OrgInfo {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        proposals_allowed,
        proposals: raw.proposals.iter().map(|p| p.low_u64()).collect(),
    };
    Ok((Some(address), Some(info)))
}
