//! `crypto/subtle/*` actions
//!
//! Validation happens here, before the provider is called: malformed
//! algorithm dictionaries and usage lists are `BadParameters`, a key that
//! does not permit the operation is `InvalidAccess`. Anything the native
//! backend rejects after that is `ProviderOperationFailed`.

use crate::crypto::{
    pair_usages, validate_usages, AlgorithmName, DeriveParams, GeneratedKey, HashAlgorithm,
    KeyAlgorithm, KeyFormat, KeyType, KeyUsage, KeyUsages,
};
use crate::protocol::params::{
    AlgorithmParams, CipherParams, DeriveBitsParams, DeriveKeyParams, DigestParams,
    ExportKeyParams, GenerateKeyParams, GenerateKeyResult, ImportKeyParams, KeyPairResult,
    UnwrapKeyParams, VerifyParams, WrapKeyParams,
};
use crate::protocol::ActionCode;
use crate::registry::ResolvedKey;

use super::{reply, reply_bytes, ActionContext, ActionError, ActionResult, Service};

const CODES: &[ActionCode] = &[
    ActionCode::Digest,
    ActionCode::GenerateKey,
    ActionCode::ImportKey,
    ActionCode::ExportKey,
    ActionCode::Encrypt,
    ActionCode::Decrypt,
    ActionCode::Sign,
    ActionCode::Verify,
    ActionCode::DeriveBits,
    ActionCode::DeriveKey,
    ActionCode::WrapKey,
    ActionCode::UnwrapKey,
];

pub struct SubtleService;

#[async_trait::async_trait]
impl Service for SubtleService {
    fn name(&self) -> &'static str {
        "subtle"
    }

    fn codes(&self) -> &'static [ActionCode] {
        CODES
    }

    async fn handle(&self, ctx: ActionContext) -> ActionResult {
        match ctx.code {
            ActionCode::Digest => digest(&ctx).await,
            ActionCode::GenerateKey => generate_key(&ctx).await,
            ActionCode::ImportKey => import_key(&ctx).await,
            ActionCode::ExportKey => export_key(&ctx).await,
            ActionCode::Encrypt => cipher(&ctx, KeyUsage::Encrypt).await,
            ActionCode::Decrypt => cipher(&ctx, KeyUsage::Decrypt).await,
            ActionCode::Sign => sign(&ctx).await,
            ActionCode::Verify => verify(&ctx).await,
            ActionCode::DeriveBits => derive_bits(&ctx).await,
            ActionCode::DeriveKey => derive_key(&ctx).await,
            ActionCode::WrapKey => wrap_key(&ctx).await,
            ActionCode::UnwrapKey => unwrap_key(&ctx).await,
            other => Err(ActionError::not_implemented(other)),
        }
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

fn format(name: &str) -> Result<KeyFormat, ActionError> {
    name.parse().map_err(ActionError::bad)
}

/// The requested operation algorithm must match the key's family.
fn check_algorithm(
    requested: &AlgorithmParams,
    key: &ResolvedKey,
) -> Result<AlgorithmName, ActionError> {
    let name: AlgorithmName = requested.name().parse().map_err(ActionError::bad)?;
    if name != key.handle.algorithm.name {
        return Err(ActionError::InvalidAccess(format!(
            "Key {} is a {} key, not {name}",
            key.handle.id, key.handle.algorithm.name
        )));
    }
    Ok(name)
}

fn check_exportable(key: &ResolvedKey) -> Result<(), ActionError> {
    if key.handle.extractable || key.handle.kind == KeyType::Public {
        Ok(())
    } else {
        Err(ActionError::InvalidAccess(format!(
            "Key {} is not extractable",
            key.handle.id
        )))
    }
}

fn check_generate_usages(algorithm: &KeyAlgorithm, usages: &KeyUsages) -> Result<(), ActionError> {
    if algorithm.name.is_asymmetric() {
        if usages.is_empty() || !usages.is_subset_of(&pair_usages(algorithm.name)) {
            return Err(ActionError::BadParameters(format!(
                "Invalid key usages for a {} key pair",
                algorithm.name
            )));
        }
        Ok(())
    } else {
        validate_usages(algorithm.name, KeyType::Secret, usages).map_err(ActionError::bad)
    }
}

/// Build derivation parameters. The ECDH peer key may belong to any
/// provider; it only contributes its public point.
fn derive_params(ctx: &ActionContext, algorithm: &AlgorithmParams) -> Result<DeriveParams, ActionError> {
    let object = algorithm.object();
    let name: AlgorithmName = object.name.parse().map_err(ActionError::bad)?;
    match name {
        AlgorithmName::Ecdh => {
            let public = object.public.ok_or_else(|| {
                ActionError::BadParameters("ECDH requires a 'public' key".into())
            })?;
            let peer = ctx.registry.get_key(public.id())?;
            if peer.handle.kind != KeyType::Public {
                return Err(ActionError::BadParameters(format!(
                    "ECDH 'public' must be a public key, {} is {}",
                    peer.handle.id, peer.handle.kind
                )));
            }
            Ok(DeriveParams::Ecdh { public: peer.key })
        }
        AlgorithmName::Hkdf => {
            let hash = algorithm
                .hash()
                .map_err(ActionError::bad)?
                .ok_or_else(|| ActionError::BadParameters("HKDF requires a hash".into()))?;
            Ok(DeriveParams::Hkdf {
                hash,
                salt: object.salt.unwrap_or_default(),
                info: object.info.unwrap_or_default(),
            })
        }
        other => Err(ActionError::BadParameters(format!(
            "{other} is not a derivation algorithm"
        ))),
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn digest(ctx: &ActionContext) -> ActionResult {
    let params: DigestParams = ctx.params()?;
    let algorithm: HashAlgorithm = params.algorithm.name().parse().map_err(ActionError::bad)?;
    let output = ctx.provider()?.digest(algorithm, params.data).await?;
    reply_bytes(output)
}

async fn generate_key(ctx: &ActionContext) -> ActionResult {
    let params: GenerateKeyParams = ctx.params()?;
    let algorithm = params.algorithm.key_algorithm().map_err(ActionError::bad)?;
    let usages = KeyUsages::new(params.key_usages);
    check_generate_usages(&algorithm, &usages)?;

    let provider = ctx.provider()?;
    let result = match provider
        .generate_key(algorithm, params.extractable, usages)
        .await?
    {
        GeneratedKey::Single(key) => GenerateKeyResult::Single(ctx.register_key(key)?),
        GeneratedKey::Pair { public, private } => {
            let (public_key, private_key) = ctx.register_key_pair(public, private)?;
            GenerateKeyResult::Pair(KeyPairResult {
                public_key,
                private_key,
            })
        }
    };
    reply(&result)
}

async fn import_key(ctx: &ActionContext) -> ActionResult {
    let params: ImportKeyParams = ctx.params()?;
    let format = format(&params.format)?;
    let algorithm = params.algorithm.import_algorithm().map_err(ActionError::bad)?;
    let provider = ctx.provider()?;
    let key = provider
        .import_key(
            format,
            params.key_data,
            algorithm,
            params.extractable,
            KeyUsages::new(params.key_usages),
        )
        .await?;
    reply(&ctx.register_key(key)?)
}

async fn export_key(ctx: &ActionContext) -> ActionResult {
    let params: ExportKeyParams = ctx.params()?;
    let format = format(&params.format)?;
    let resolved = ctx.key(&params.key)?;
    check_exportable(&resolved)?;
    let exported = ctx.provider()?.export_key(format, resolved.key).await?;
    reply_bytes(exported)
}

async fn cipher(ctx: &ActionContext, usage: KeyUsage) -> ActionResult {
    let params: CipherParams = ctx.params()?;
    let resolved = ctx.key_for(&params.key, usage)?;
    check_algorithm(&params.algorithm, &resolved)?;
    let gcm = params.algorithm.aes_gcm().map_err(ActionError::bad)?;

    let provider = ctx.provider()?;
    let output = match usage {
        KeyUsage::Encrypt => provider.encrypt(gcm, resolved.key, params.data).await?,
        _ => provider.decrypt(gcm, resolved.key, params.data).await?,
    };
    reply_bytes(output)
}

async fn sign(ctx: &ActionContext) -> ActionResult {
    let params: CipherParams = ctx.params()?;
    let resolved = ctx.key_for(&params.key, KeyUsage::Sign)?;
    let name = check_algorithm(&params.algorithm, &resolved)?;
    let hash = params.algorithm.hash().map_err(ActionError::bad)?;
    let signature = ctx
        .provider()?
        .sign(name, hash, resolved.key, params.data)
        .await?;
    reply_bytes(signature)
}

async fn verify(ctx: &ActionContext) -> ActionResult {
    let params: VerifyParams = ctx.params()?;
    let resolved = ctx.key_for(&params.key, KeyUsage::Verify)?;
    let name = check_algorithm(&params.algorithm, &resolved)?;
    let hash = params.algorithm.hash().map_err(ActionError::bad)?;
    let valid = ctx
        .provider()?
        .verify(name, hash, resolved.key, params.signature, params.data)
        .await?;
    reply(&valid)
}

async fn derive_bits(ctx: &ActionContext) -> ActionResult {
    let params: DeriveBitsParams = ctx.params()?;
    let base = ctx.key_for(&params.base_key, KeyUsage::DeriveBits)?;
    check_algorithm(&params.algorithm, &base)?;
    let derive = derive_params(ctx, &params.algorithm)?;
    let bits = ctx
        .provider()?
        .derive_bits(derive, base.key, params.length)
        .await?;
    reply_bytes(bits)
}

async fn derive_key(ctx: &ActionContext) -> ActionResult {
    let params: DeriveKeyParams = ctx.params()?;
    let base = ctx.key_for(&params.base_key, KeyUsage::DeriveKey)?;
    check_algorithm(&params.algorithm, &base)?;
    let derive = derive_params(ctx, &params.algorithm)?;
    let derived = params
        .derived_key_type
        .key_algorithm()
        .map_err(ActionError::bad)?;
    let usages = KeyUsages::new(params.key_usages);
    validate_usages(derived.name, KeyType::Secret, &usages).map_err(ActionError::bad)?;

    let provider = ctx.provider()?;
    let key = provider
        .derive_key(derive, base.key, derived, params.extractable, usages)
        .await?;
    reply(&ctx.register_key(key)?)
}

async fn wrap_key(ctx: &ActionContext) -> ActionResult {
    let params: WrapKeyParams = ctx.params()?;
    let format = format(&params.format)?;
    let wrapping = ctx.key_for(&params.wrapping_key, KeyUsage::WrapKey)?;
    check_algorithm(&params.wrap_algorithm, &wrapping)?;
    let gcm = params.wrap_algorithm.aes_gcm().map_err(ActionError::bad)?;
    let key = ctx.key(&params.key)?;
    check_exportable(&key)?;

    let wrapped = ctx
        .provider()?
        .wrap_key(format, key.key, wrapping.key, gcm)
        .await?;
    reply_bytes(wrapped)
}

async fn unwrap_key(ctx: &ActionContext) -> ActionResult {
    let params: UnwrapKeyParams = ctx.params()?;
    let format = format(&params.format)?;
    let unwrapping = ctx.key_for(&params.unwrapping_key, KeyUsage::UnwrapKey)?;
    check_algorithm(&params.unwrap_algorithm, &unwrapping)?;
    let gcm = params.unwrap_algorithm.aes_gcm().map_err(ActionError::bad)?;
    let algorithm = params
        .unwrapped_key_algorithm
        .import_algorithm()
        .map_err(ActionError::bad)?;

    let provider = ctx.provider()?;
    let key = provider
        .unwrap_key(
            format,
            params.wrapped_key,
            unwrapping.key,
            gcm,
            algorithm,
            params.extractable,
            KeyUsages::new(params.key_usages),
        )
        .await?;
    reply(&ctx.register_key(key)?)
}
