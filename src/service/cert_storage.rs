//! `crypto/cert/*` and `crypto/certStorage/*` actions

use crate::crypto::{Certificate, CertificateFormat, CertificateType};
use crate::protocol::params::{
    CertExportParams, CertGetItemParams, CertImportParams, IndexOfParams, RemoveItemParams,
    SetItemParams,
};
use crate::protocol::ActionCode;
use crate::provider::StorageContext;
use crate::registry::ObjectKind;

use super::{reply, reply_bytes, reply_void, ActionContext, ActionError, ActionResult, Service};

const CODES: &[ActionCode] = &[
    ActionCode::CertImport,
    ActionCode::CertExport,
    ActionCode::CertStorageGetItem,
    ActionCode::CertStorageSetItem,
    ActionCode::CertStorageRemoveItem,
    ActionCode::CertStorageKeys,
    ActionCode::CertStorageIndexOf,
    ActionCode::CertStorageClear,
];

pub struct CertStorageService;

#[async_trait::async_trait]
impl Service for CertStorageService {
    fn name(&self) -> &'static str {
        "certStorage"
    }

    fn codes(&self) -> &'static [ActionCode] {
        CODES
    }

    async fn handle(&self, ctx: ActionContext) -> ActionResult {
        let provider = ctx.provider()?;
        match ctx.code {
            ActionCode::CertImport => {
                let params: CertImportParams = ctx.params()?;
                let kind: CertificateType = params.kind.parse().map_err(ActionError::bad)?;
                let certificate =
                    Certificate::parse(kind, &params.data, params.label).map_err(ActionError::bad)?;
                reply(&ctx.register_certificate(certificate)?)
            }
            ActionCode::CertExport => {
                let params: CertExportParams = ctx.params()?;
                let format: CertificateFormat = params.format.parse().map_err(ActionError::bad)?;
                let resolved = ctx.certificate(&params.cert)?;
                reply_bytes(resolved.certificate.export(format))
            }
            ActionCode::CertStorageGetItem => {
                let params: CertGetItemParams = ctx.params()?;
                match provider.cert_storage_get(&params.key)? {
                    Some(certificate) => {
                        reply(&Some(ctx.register_certificate(certificate)?))
                    }
                    None => reply(&None::<()>),
                }
            }
            ActionCode::CertStorageSetItem => {
                let params: SetItemParams = ctx.params()?;
                let resolved = ctx.certificate(&params.item)?;
                let context = StorageContext {
                    origin: ctx.session.origin().to_string(),
                    label: params.label,
                };
                let storage_key = provider
                    .cert_storage_set(resolved.certificate, context)
                    .await?;
                reply(&storage_key)
            }
            ActionCode::CertStorageRemoveItem => {
                let params: RemoveItemParams = ctx.params()?;
                provider.cert_storage_remove(&params.key).await?;
                reply_void()
            }
            ActionCode::CertStorageKeys => reply(&provider.cert_storage_keys()),
            ActionCode::CertStorageIndexOf => {
                let params: IndexOfParams = ctx.params()?;
                let resolved = ctx.registry.get_certificate(params.item.id())?;
                reply(&provider.cert_storage_index_of(&resolved.certificate))
            }
            ActionCode::CertStorageClear => {
                provider.cert_storage_clear().await?;
                ctx.registry
                    .clear_provider(provider.id(), ObjectKind::Certificate);
                reply_void()
            }
            other => Err(ActionError::not_implemented(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::params::HandleRef;
    use crate::protocol::ErrorCode;
    use crate::registry::CertHandle;
    use crate::service::test_support::{decode, Fixture};

    // Minimal DER SEQUENCE; the service only needs a well-formed outer tag.
    const DER: &[u8] = &[0x30, 0x03, 0x02, 0x01, 0x01];

    async fn run<T: serde::Serialize>(
        fixture: &Fixture,
        code: ActionCode,
        params: &T,
    ) -> ActionResult {
        CertStorageService
            .handle(fixture.ctx(code, "hybrid", params))
            .await
    }

    async fn import(fixture: &Fixture) -> CertHandle {
        decode(
            &run(
                fixture,
                ActionCode::CertImport,
                &CertImportParams {
                    kind: "x509".into(),
                    data: DER.to_vec(),
                    label: Some("Signing".into()),
                },
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_import_export_pem() {
        let fixture = Fixture::new();
        let handle = import(&fixture).await;
        assert_eq!(handle.provider_id, "hybrid");
        assert_eq!(handle.label.as_deref(), Some("Signing"));

        let pem: serde_bytes::ByteBuf = decode(
            &run(
                &fixture,
                ActionCode::CertExport,
                &CertExportParams {
                    cert: HandleRef::Id(handle.id.clone()),
                    format: "pem".into(),
                },
            )
            .await
            .unwrap(),
        );
        let pem = String::from_utf8(pem.into_vec()).unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));

        let raw: serde_bytes::ByteBuf = decode(
            &run(
                &fixture,
                ActionCode::CertExport,
                &CertExportParams {
                    cert: HandleRef::Id(handle.id),
                    format: "raw".into(),
                },
            )
            .await
            .unwrap(),
        );
        assert_eq!(raw.as_slice(), DER);
    }

    #[tokio::test]
    async fn test_storage_round_trip() {
        let fixture = Fixture::new();
        let handle = import(&fixture).await;
        let storage_key: String = decode(
            &run(
                &fixture,
                ActionCode::CertStorageSetItem,
                &SetItemParams {
                    item: HandleRef::Id(handle.id.clone()),
                    label: None,
                },
            )
            .await
            .unwrap(),
        );

        let restored: Option<CertHandle> = decode(
            &run(
                &fixture,
                ActionCode::CertStorageGetItem,
                &CertGetItemParams {
                    key: storage_key.clone(),
                },
            )
            .await
            .unwrap(),
        );
        let restored = restored.unwrap();
        assert_eq!(restored.fingerprint, handle.fingerprint);

        let index: Option<String> = decode(
            &run(
                &fixture,
                ActionCode::CertStorageIndexOf,
                &IndexOfParams {
                    item: HandleRef::Id(restored.id),
                },
            )
            .await
            .unwrap(),
        );
        assert_eq!(index, Some(storage_key));

        run(&fixture, ActionCode::CertStorageClear, &()).await.unwrap();
        assert!(fixture.registry.get_certificate(&handle.id).is_err());
    }

    #[tokio::test]
    async fn test_bad_certificate_input() {
        let fixture = Fixture::new();
        let err = run(
            &fixture,
            ActionCode::CertImport,
            &CertImportParams {
                kind: "x509".into(),
                data: b"not a certificate".to_vec(),
                label: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadParameters);

        let err = run(
            &fixture,
            ActionCode::CertImport,
            &CertImportParams {
                kind: "crl".into(),
                data: DER.to_vec(),
                label: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadParameters);
    }
}
