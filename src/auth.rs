//! The signing session: wraps the social-login identity provider and turns
//! a successful sign-in into an authenticated owner identity plus a
//! selected smart account.

use async_trait::async_trait;
use ethers::types::Address;

use crate::context::{SessionContext, SessionEvent};
use crate::error::Result;
use crate::safe;

/// What the identity provider knows about a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The owner (externally-owned account) address.
    pub owner: Address,
    /// Smart accounts already associated with this identity, in the
    /// provider's (stable but provider-defined) order.
    pub safes: Vec<Address>,
    /// The email the user authenticated with.
    pub email: String,
}

/// The social-login provider, as a narrow capability. One concrete adapter
/// per SDK; the core only depends on this trait.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Run the external authentication flow.
    async fn sign_in(&self) -> Result<AuthenticatedUser>;
    /// Invalidate the provider-side session.
    async fn sign_out(&self) -> Result<()>;
    /// Whether the provider reports an already-connected state, enabling a
    /// silent re-authentication at startup.
    fn is_connected(&self) -> bool;
}

/// Establish an authenticated signing identity.
///
/// On success the session owner, the known safes and the email are
/// populated, the smart account is resolved (memoized per owner/chain, see
/// [`crate::safe::resolve`]) and `LoggedIn` is emitted. On failure the
/// session is left unauthenticated and the error is returned to the caller,
/// who must re-invoke; no retry happens here. Nothing is persisted beyond
/// the in-memory session.
pub async fn login(
    ctx: &SessionContext,
    provider: &dyn IdentityProvider,
) -> Result<()> {
    let epoch = ctx.epoch();
    let user = provider.sign_in().await?;
    // the login round-trip is a suspension point: a chain switch that
    // happened while the modal was open invalidates this result.
    if !ctx.is_current(epoch) {
        tracing::warn!("Discarding login that completed after a state reset");
        return Ok(());
    }
    let chain = ctx.chain()?;
    let selected = match ctx.selected_safe() {
        Some(existing) if existing.owner == user.owner => existing,
        _ => safe::resolve(
            user.owner,
            &user.safes,
            chain.numeric_id()?,
            &ctx.config().deployment,
        ),
    };
    ctx.apply_login(user.owner, user.safes, &user.email, selected);
    tracing::event!(
        target: crate::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %crate::probe::Kind::Lifecycle,
        logged_in = true,
        safe = %selected.address,
    );
    ctx.emit(SessionEvent::LoggedIn);
    Ok(())
}

/// The silent once-at-startup re-authentication: a no-op unless the
/// provider reports an already-connected state.
pub async fn resume(
    ctx: &SessionContext,
    provider: &dyn IdentityProvider,
) -> Result<()> {
    if !provider.is_connected() {
        tracing::trace!("Identity provider not connected, nothing to resume");
        return Ok(());
    }
    login(ctx, provider).await
}

/// Tear down the authenticated session.
///
/// The provider-side sign-out is best-effort (a failure is logged); the
/// local session, smart-account selection, organization context and relay
/// task are always reset, and in-flight continuations from the old session
/// are invalidated.
pub async fn logout(ctx: &SessionContext, provider: &dyn IdentityProvider) {
    if let Err(e) = provider.sign_out().await {
        tracing::warn!("Identity provider sign-out failed: {}", e);
    }
    ctx.clear_session();
    tracing::event!(
        target: crate::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %crate::probe::Kind::Lifecycle,
        logged_out = true,
    );
    ctx.emit(SessionEvent::LoggedOut);
}

/// Relabel the session email without re-authenticating.
///
/// The email only targets organizations and is not cryptographically
/// re-verified after the initial login. Re-derives the organization
/// identity and emits `EmailChanged`.
pub fn set_email(ctx: &SessionContext, email: &str) {
    ctx.relabel_email(email);
    ctx.emit(SessionEvent::EmailChanged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SuperfundrsConfig;
    use crate::test_utils::MockIdentity;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn ctx() -> SessionContext {
        SessionContext::new(SuperfundrsConfig::default())
    }

    fn owner(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[tokio::test]
    async fn login_populates_the_session() {
        let ctx = ctx();
        let provider =
            MockIdentity::with_user("sf.admin@uni1.edu", owner(1), vec![]);
        login(&ctx, &provider).await.unwrap();
        let session = ctx.session();
        assert!(session.is_authenticated());
        assert_eq!(session.owner, Some(owner(1)));
        assert_eq!(session.email.as_deref(), Some("sf.admin@uni1.edu"));
        let org = ctx.org();
        assert_eq!(org.org_id.as_deref(), Some("uni1.edu"));
        assert!(org.is_admin);
        // no existing safes: a counterfactual address was derived.
        let selected = ctx.selected_safe().unwrap();
        assert_eq!(selected.owner, owner(1));
        assert_eq!(selected.deployed, None);
    }

    #[tokio::test]
    async fn login_prefers_an_existing_safe() {
        let ctx = ctx();
        let provider = MockIdentity::with_user(
            "alice@uni1.edu",
            owner(1),
            vec![owner(7), owner(8)],
        );
        login(&ctx, &provider).await.unwrap();
        let selected = ctx.selected_safe().unwrap();
        assert_eq!(selected.address, owner(7));
        assert_eq!(selected.deployed, Some(true));
    }

    #[tokio::test]
    async fn failed_login_leaves_the_session_unauthenticated() {
        let ctx = ctx();
        let provider =
            MockIdentity::with_user("alice@uni1.edu", owner(1), vec![]);
        provider.fail_sign_in.store(true, Ordering::SeqCst);
        assert!(login(&ctx, &provider).await.is_err());
        assert!(!ctx.session().is_authenticated());
        assert!(ctx.selected_safe().is_none());
    }

    #[tokio::test]
    async fn login_completing_after_a_chain_switch_is_discarded() {
        let ctx = Arc::new(ctx());
        let provider = Arc::new(MockIdentity::with_user(
            "sf.admin@uni1.edu",
            owner(1),
            vec![],
        ));
        let gate = provider.gate();
        let task = {
            let ctx = ctx.clone();
            let provider = provider.clone();
            tokio::spawn(async move { login(&ctx, provider.as_ref()).await })
        };
        // let the login task park on the provider gate.
        tokio::task::yield_now().await;
        ctx.switch_chain("0x64").unwrap();
        gate.notify_one();
        task.await.unwrap().unwrap();
        // the late result was dropped on the floor.
        assert!(!ctx.session().is_authenticated());
        assert!(ctx.selected_safe().is_none());
    }

    #[tokio::test]
    async fn logout_resets_even_when_sign_out_fails() {
        let ctx = ctx();
        let provider =
            MockIdentity::with_user("sf.admin@uni1.edu", owner(1), vec![]);
        login(&ctx, &provider).await.unwrap();
        provider.fail_sign_out.store(true, Ordering::SeqCst);
        logout(&ctx, &provider).await;
        assert_eq!(provider.sign_outs.load(Ordering::SeqCst), 1);
        assert!(!ctx.session().is_authenticated());
        assert!(ctx.org().org_id.is_none());
        assert!(ctx.selected_safe().is_none());
    }

    #[tokio::test]
    async fn resume_is_a_no_op_when_disconnected() {
        let ctx = ctx();
        let provider =
            MockIdentity::with_user("alice@uni1.edu", owner(1), vec![]);
        resume(&ctx, &provider).await.unwrap();
        assert!(!ctx.session().is_authenticated());

        provider.connected.store(true, Ordering::SeqCst);
        resume(&ctx, &provider).await.unwrap();
        assert!(ctx.session().is_authenticated());
    }

    #[tokio::test]
    async fn set_email_relabels_the_org_identity() {
        let ctx = ctx();
        let provider =
            MockIdentity::with_user("alice@uni1.edu", owner(1), vec![]);
        login(&ctx, &provider).await.unwrap();
        assert!(ctx.org().org_id.is_none());

        set_email(&ctx, "sf.admin@uni2.edu");
        let org = ctx.org();
        assert_eq!(org.org_id.as_deref(), Some("uni2.edu"));
        assert!(org.is_admin);
        // still the same signing identity.
        assert_eq!(ctx.session().owner, Some(owner(1)));
    }
}
