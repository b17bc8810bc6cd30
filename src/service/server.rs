//! `server/*` actions

use crate::protocol::params::ReleaseParams;
use crate::protocol::ActionCode;

use super::{reply_void, ActionContext, ActionError, ActionResult, Service};

const CODES: &[ActionCode] = &[ActionCode::ServerRelease, ActionCode::ServerPing];

pub struct ServerService;

#[async_trait::async_trait]
impl Service for ServerService {
    fn name(&self) -> &'static str {
        "server"
    }

    fn codes(&self) -> &'static [ActionCode] {
        CODES
    }

    async fn handle(&self, ctx: ActionContext) -> ActionResult {
        match ctx.code {
            ActionCode::ServerPing => reply_void(),
            ActionCode::ServerRelease => {
                let params: ReleaseParams = ctx.params()?;
                for handle in &params.handles {
                    ctx.registry.remove(handle.id());
                    ctx.session.untrack(handle.id());
                }
                reply_void()
            }
            other => Err(ActionError::not_implemented(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{engine, GeneratedKey, KeyAlgorithm, KeyUsage, KeyUsages};
    use crate::protocol::params::HandleRef;
    use crate::service::test_support::Fixture;

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let fixture = Fixture::new();
        let GeneratedKey::Single(key) = engine::generate_key(
            &KeyAlgorithm::aes_gcm(128),
            true,
            KeyUsages::new(vec![KeyUsage::Encrypt]),
        )
        .unwrap() else {
            panic!("expected a single key");
        };
        let handle = fixture.registry.add_key(key, "software").unwrap();

        let params = ReleaseParams {
            handles: vec![HandleRef::Id(handle.id.clone()), HandleRef::Id("gone-1".into())],
        };
        for _ in 0..2 {
            ServerService
                .handle(fixture.ctx(ActionCode::ServerRelease, "software", &params))
                .await
                .unwrap();
        }
        assert!(fixture.registry.is_empty());
    }

    #[tokio::test]
    async fn test_ping() {
        let fixture = Fixture::new();
        let reply = ServerService
            .handle(fixture.ctx(ActionCode::ServerPing, "software", &()))
            .await
            .unwrap();
        assert_eq!(reply, vec![0xc0]);
    }
}
