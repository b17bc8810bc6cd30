//! `provider/*` actions: capability discovery and session login

use tracing::{info, warn};

use crate::protocol::params::LoginParams;
use crate::protocol::ActionCode;

use super::{reply, reply_void, ActionContext, ActionError, ActionResult, Service};

const CODES: &[ActionCode] = &[
    ActionCode::ProviderInfo,
    ActionCode::ProviderLogin,
    ActionCode::ProviderLogout,
    ActionCode::ProviderIsLoggedIn,
];

pub struct ProviderService;

#[async_trait::async_trait]
impl Service for ProviderService {
    fn name(&self) -> &'static str {
        "provider"
    }

    fn codes(&self) -> &'static [ActionCode] {
        CODES
    }

    async fn handle(&self, ctx: ActionContext) -> ActionResult {
        match ctx.code {
            ActionCode::ProviderInfo => reply(&ctx.directory.list()),
            ActionCode::ProviderLogin => login(&ctx).await,
            ActionCode::ProviderLogout => {
                let provider = ctx.provider()?;
                ctx.session.logout(provider.id());
                reply_void()
            }
            ActionCode::ProviderIsLoggedIn => {
                let provider = ctx.provider()?;
                let logged_in =
                    !provider.info().requires_login || ctx.session.is_authenticated(provider.id());
                reply(&logged_in)
            }
            other => Err(ActionError::not_implemented(other)),
        }
    }
}

async fn login(ctx: &ActionContext) -> ActionResult {
    let provider = ctx.provider()?;
    let params: LoginParams = ctx.params()?;
    let session_id = ctx.session.id().to_string();
    let result = provider.login(&params.pin);
    ctx.usage
        .log_provider_login(&session_id, ctx.session.origin(), provider.id(), result.is_ok())
        .await;

    match result {
        Ok(()) => {
            ctx.session.authenticate(provider.id());
            info!(session = %session_id, provider = %provider.id(), "Provider login succeeded");
            reply_void()
        }
        Err(e) => {
            warn!(session = %session_id, provider = %provider.id(), "Provider login failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use crate::provider::ProviderInfo;
    use crate::service::test_support::{decode, Fixture, TEST_PIN};

    async fn run<T: serde::Serialize>(
        fixture: &Fixture,
        code: ActionCode,
        provider: &str,
        params: &T,
    ) -> ActionResult {
        ProviderService
            .handle(fixture.ctx(code, provider, params))
            .await
    }

    async fn logged_in(fixture: &Fixture, provider: &str) -> bool {
        decode(
            &run(fixture, ActionCode::ProviderIsLoggedIn, provider, &())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_info_lists_all_providers() {
        let fixture = Fixture::new();
        let infos: Vec<ProviderInfo> = decode(
            &run(&fixture, ActionCode::ProviderInfo, "none", &())
                .await
                .unwrap(),
        );
        let ids: Vec<_> = infos.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["software", "token", "hybrid"]);
        assert!(infos[1].is_hardware);
    }

    #[tokio::test]
    async fn test_login_logout() {
        let fixture = Fixture::new();
        assert!(!logged_in(&fixture, "token").await);
        assert!(logged_in(&fixture, "software").await);

        let err = run(
            &fixture,
            ActionCode::ProviderLogin,
            "token",
            &LoginParams { pin: "0000".into() },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAuthenticated);
        assert!(!logged_in(&fixture, "token").await);

        run(
            &fixture,
            ActionCode::ProviderLogin,
            "token",
            &LoginParams {
                pin: TEST_PIN.into(),
            },
        )
        .await
        .unwrap();
        assert!(logged_in(&fixture, "token").await);

        run(&fixture, ActionCode::ProviderLogout, "token", &())
            .await
            .unwrap();
        assert!(!logged_in(&fixture, "token").await);
    }
}
