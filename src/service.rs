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

//! Wires the session together: a background task that listens to session
//! events and keeps the organization view fresh.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::context::{SessionContext, SessionEvent};
use crate::contracts::ChainReader;
use crate::org;

fn refresh_trigger(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::LoggedIn
            | SessionEvent::EmailChanged
            | SessionEvent::OrgHintApplied
            | SessionEvent::RelaySubmitted
    )
}

/// Starts the organization sync task.
///
/// Every event that can change which organization the session targets, or
/// that organization's on-chain state, triggers a re-read through the
/// chain reader. The task runs until the context shuts down or the event
/// bus closes.
pub fn ignite(
    ctx: Arc<SessionContext>,
    reader: Arc<dyn ChainReader>,
) -> JoinHandle<()> {
    let mut events = ctx.subscribe();
    let mut shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        tracing::debug!("Starting the organization sync task");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) if refresh_trigger(&event) => {
                        org::refresh(&ctx, reader.as_ref()).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session event bus lagged, refreshing");
                        org::refresh(&ctx, reader.as_ref()).await;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    tracing::trace!("Stopping the organization sync task");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth;
    use crate::config::SuperfundrsConfig;
    use crate::relay;
    use crate::test_utils::{MockChain, MockIdentity, MockRelay, MockSigner};
    use ethers::types::Address;
    use std::time::Duration;

    async fn wait_until(mut probe: impl FnMut() -> bool) {
        for _ in 0..50 {
            if probe() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn admin_sees_their_organization_come_alive() {
        crate::test_utils::setup_logger();
        let ctx = Arc::new(SessionContext::new(SuperfundrsConfig::default()));
        let chain = Arc::new(MockChain::default());
        let sync = ignite(ctx.clone(), chain.clone());

        let provider = MockIdentity::with_user(
            "sf.admin@uni1.edu",
            Address::from_low_u64_be(1),
            vec![],
        );
        auth::login(&ctx, &provider).await.unwrap();
        // the login-triggered refresh finds no organization on chain yet.
        wait_until(|| ctx.org().org_id.is_some()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ctx.org().info.is_none());
        assert!(!ctx.org().proposals_allowed());

        // the admin creates the organization; the relayed registry call
        // lands on chain and the acknowledgement triggers a refresh.
        let mock_relay = MockRelay::default();
        chain.register_org("uni1.edu", "Uni One", "the first one");
        let task = relay::create_organization(
            &ctx,
            &MockSigner,
            &mock_relay,
            "Uni One",
            "the first one",
        )
        .await;
        assert!(task.is_some());

        wait_until(|| ctx.org().info.is_some()).await;
        let org = ctx.org();
        let info = org.info.clone().unwrap();
        assert_eq!(info.id, "uni1.edu");
        assert_eq!(info.name, "Uni One");
        assert!(org.org_address.is_some());
        assert!(!org.proposals_allowed());

        ctx.shutdown();
        let _ = sync.await;
    }
}
