//! `crypto/keyStorage/*` actions
//!
//! Storage keys are the provider's durable names; handles are the transient
//! wire identity. `getItem` registers what it restores so the result can be
//! used by handle right away.

use crate::protocol::params::{IndexOfParams, KeyGetItemParams, RemoveItemParams, SetItemParams};
use crate::protocol::ActionCode;
use crate::provider::{KeyOverrides, StorageContext};
use crate::registry::ObjectKind;

use super::{reply, reply_void, ActionContext, ActionError, ActionResult, Service};

const CODES: &[ActionCode] = &[
    ActionCode::KeyStorageGetItem,
    ActionCode::KeyStorageSetItem,
    ActionCode::KeyStorageRemoveItem,
    ActionCode::KeyStorageKeys,
    ActionCode::KeyStorageIndexOf,
    ActionCode::KeyStorageClear,
];

pub struct KeyStorageService;

#[async_trait::async_trait]
impl Service for KeyStorageService {
    fn name(&self) -> &'static str {
        "keyStorage"
    }

    fn codes(&self) -> &'static [ActionCode] {
        CODES
    }

    async fn handle(&self, ctx: ActionContext) -> ActionResult {
        let provider = ctx.provider()?;
        match ctx.code {
            ActionCode::KeyStorageGetItem => {
                let params: KeyGetItemParams = ctx.params()?;
                let overrides = KeyOverrides {
                    algorithm: params
                        .algorithm
                        .as_ref()
                        .map(|a| a.import_algorithm())
                        .transpose()
                        .map_err(ActionError::bad)?,
                    extractable: params.extractable,
                    usages: params.usages(),
                };
                match provider.key_storage_get(&params.key, overrides)? {
                    Some(key) => reply(&Some(ctx.register_key(key)?)),
                    None => reply(&None::<()>),
                }
            }
            ActionCode::KeyStorageSetItem => {
                let params: SetItemParams = ctx.params()?;
                let resolved = ctx.key(&params.item)?;
                let context = StorageContext {
                    origin: ctx.session.origin().to_string(),
                    label: params.label,
                };
                let storage_key = provider.key_storage_set(resolved.key, context).await?;
                reply(&storage_key)
            }
            ActionCode::KeyStorageRemoveItem => {
                let params: RemoveItemParams = ctx.params()?;
                provider.key_storage_remove(&params.key).await?;
                reply_void()
            }
            ActionCode::KeyStorageKeys => reply(&provider.key_storage_keys()),
            ActionCode::KeyStorageIndexOf => {
                let params: IndexOfParams = ctx.params()?;
                let resolved = ctx.registry.get_key(params.item.id())?;
                reply(&provider.key_storage_index_of(&resolved.key))
            }
            ActionCode::KeyStorageClear => {
                provider.key_storage_clear().await?;
                ctx.registry.clear_provider(provider.id(), ObjectKind::Key);
                reply_void()
            }
            other => Err(ActionError::not_implemented(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyUsage;
    use crate::protocol::params::{AlgorithmObject, AlgorithmParams, GenerateKeyParams, HandleRef};
    use crate::protocol::ErrorCode;
    use crate::registry::KeyHandle;
    use crate::service::test_support::{decode, Fixture};
    use crate::service::SubtleService;

    async fn hmac_key(fixture: &Fixture, provider: &str) -> KeyHandle {
        let params = GenerateKeyParams {
            algorithm: AlgorithmParams::Object(AlgorithmObject {
                name: "HMAC".into(),
                hash: Some(crate::protocol::params::HashRef::Name("SHA-256".into())),
                ..Default::default()
            }),
            extractable: false,
            key_usages: vec![KeyUsage::Sign, KeyUsage::Verify],
        };
        let bytes = SubtleService
            .handle(fixture.ctx(ActionCode::GenerateKey, provider, &params))
            .await
            .unwrap();
        decode(&bytes)
    }

    async fn run<T: serde::Serialize>(
        fixture: &Fixture,
        code: ActionCode,
        provider: &str,
        params: &T,
    ) -> ActionResult {
        KeyStorageService
            .handle(fixture.ctx(code, provider, params))
            .await
    }

    #[tokio::test]
    async fn test_set_get_registers_a_new_handle() {
        let fixture = Fixture::new();
        let key = hmac_key(&fixture, "software").await;

        let storage_key: String = decode(
            &run(
                &fixture,
                ActionCode::KeyStorageSetItem,
                "software",
                &SetItemParams {
                    item: HandleRef::Id(key.id.clone()),
                    label: None,
                },
            )
            .await
            .unwrap(),
        );
        let keys: Vec<String> = decode(
            &run(&fixture, ActionCode::KeyStorageKeys, "software", &())
                .await
                .unwrap(),
        );
        assert_eq!(keys, vec![storage_key.clone()]);

        let restored: Option<KeyHandle> = decode(
            &run(
                &fixture,
                ActionCode::KeyStorageGetItem,
                "software",
                &KeyGetItemParams {
                    key: storage_key.clone(),
                    algorithm: None,
                    extractable: None,
                    key_usages: None,
                },
            )
            .await
            .unwrap(),
        );
        let restored = restored.unwrap();
        assert_ne!(restored.id, key.id);
        assert_eq!(restored.algorithm, key.algorithm);
        assert!(fixture.registry.get_key(&restored.id).is_ok());

        let index: Option<String> = decode(
            &run(
                &fixture,
                ActionCode::KeyStorageIndexOf,
                "software",
                &IndexOfParams {
                    item: HandleRef::Id(restored.id),
                },
            )
            .await
            .unwrap(),
        );
        assert_eq!(index, Some(storage_key));
    }

    #[tokio::test]
    async fn test_missing_item_is_nil_and_remove_is_idempotent() {
        let fixture = Fixture::new();
        let missing: Option<KeyHandle> = decode(
            &run(
                &fixture,
                ActionCode::KeyStorageGetItem,
                "software",
                &KeyGetItemParams {
                    key: "secret-0000".into(),
                    algorithm: None,
                    extractable: None,
                    key_usages: None,
                },
            )
            .await
            .unwrap(),
        );
        assert!(missing.is_none());

        let remove = RemoveItemParams {
            key: "secret-0000".into(),
        };
        run(&fixture, ActionCode::KeyStorageRemoveItem, "software", &remove)
            .await
            .unwrap();
        run(&fixture, ActionCode::KeyStorageRemoveItem, "software", &remove)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_drops_provider_key_handles() {
        let fixture = Fixture::new();
        let software = hmac_key(&fixture, "software").await;
        let hybrid = hmac_key(&fixture, "hybrid").await;
        run(
            &fixture,
            ActionCode::KeyStorageSetItem,
            "software",
            &SetItemParams {
                item: HandleRef::Id(software.id.clone()),
                label: None,
            },
        )
        .await
        .unwrap();

        run(&fixture, ActionCode::KeyStorageClear, "software", &())
            .await
            .unwrap();
        let keys: Vec<String> = decode(
            &run(&fixture, ActionCode::KeyStorageKeys, "software", &())
                .await
                .unwrap(),
        );
        assert!(keys.is_empty());

        let err = run(
            &fixture,
            ActionCode::KeyStorageSetItem,
            "software",
            &SetItemParams {
                item: HandleRef::Id(software.id),
                label: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandleNotFound);
        assert!(fixture.registry.get_key(&hybrid.id).is_ok());
    }
}
