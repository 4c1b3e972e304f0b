//! Post-transfer integrity verification.
//!
//! Verification is a two-step strategy. Both sides are first asked for a
//! content digest. Only when either side cannot provide one does the verifier
//! fall back to comparing sizes, which is reported as a weaker outcome.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mirrorsync_common::{Error, RemotePath, Result};
use mirrorsync_storage::{DigestAlgorithm, DigestReply, RemoteFs};

/// Outcome of verifying one transferred file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verification {
    /// Digests were available on both sides and equal.
    Verified,
    /// Digests were unavailable; sizes are equal.
    SizeMatchedOnly,
    /// Source and target disagree, or integrity could not be established.
    Mismatch { reason: String },
}

impl Verification {
    /// Whether the file counts as successfully synced.
    pub fn is_match(&self) -> bool {
        !matches!(self, Verification::Mismatch { .. })
    }

    /// Convert a mismatch into `Error::Mismatch`.
    pub fn into_result(self, path: &RemotePath) -> Result<Verification> {
        match self {
            Verification::Mismatch { reason } => Err(Error::Mismatch {
                path: path.to_string(),
                reason,
            }),
            other => Ok(other),
        }
    }
}

/// Result of asking both sides for a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestProbe {
    /// Both sides returned a digest.
    Available { source: String, target: String },
    /// At least one side could not produce a digest.
    Unavailable { reason: String },
}

async fn probe_one(
    client: &dyn RemoteFs,
    side: &str,
    path: &RemotePath,
    algorithm: DigestAlgorithm,
) -> std::result::Result<String, String> {
    match client.digest(path, algorithm).await {
        Ok(DigestReply::Digest(hex)) => Ok(hex),
        Ok(DigestReply::Unsupported) => Err(format!(
            "{} ({}) does not support {} digests",
            side,
            client.name(),
            algorithm
        )),
        Err(e) => Err(format!("{} digest failed: {}", side, e)),
    }
}

/// Ask both sides for a digest of `path`.
///
/// An unsupported reply or a protocol error from either side yields
/// [`DigestProbe::Unavailable`]; this never fails.
pub async fn probe_digests(
    source: &dyn RemoteFs,
    target: &dyn RemoteFs,
    path: &RemotePath,
    algorithm: DigestAlgorithm,
) -> DigestProbe {
    let source_digest = match probe_one(source, "source", path, algorithm).await {
        Ok(hex) => hex,
        Err(reason) => return DigestProbe::Unavailable { reason },
    };
    match probe_one(target, "target", path, algorithm).await {
        Ok(target_digest) => DigestProbe::Available {
            source: source_digest,
            target: target_digest,
        },
        Err(reason) => DigestProbe::Unavailable { reason },
    }
}

/// Compare file sizes on both sides.
///
/// Returns `Ok(true)` when both sizes are known and equal.
pub async fn compare_sizes(
    source: &dyn RemoteFs,
    target: &dyn RemoteFs,
    path: &RemotePath,
) -> Result<bool> {
    let source_size = source.stat(path).await?.size;
    let target_size = target.stat(path).await?.size;
    debug!(?source_size, ?target_size, "Comparing sizes for {}", path);
    Ok(source_size.is_some() && source_size == target_size)
}

/// Verify that `path` has the same content on `source` and `target`.
///
/// # Errors
/// Never returns `Err` for a disagreement; mismatches are a regular
/// [`Verification`]. A stat failure during the size fallback is reported as
/// [`Verification::Mismatch`] too.
pub async fn verify(
    source: &dyn RemoteFs,
    target: &dyn RemoteFs,
    path: &RemotePath,
    algorithm: DigestAlgorithm,
) -> Result<Verification> {
    match probe_digests(source, target, path, algorithm).await {
        DigestProbe::Available {
            source: src,
            target: dst,
        } => {
            if src == dst {
                debug!("Digest match for {}: {}", path, src);
                Ok(Verification::Verified)
            } else {
                Ok(Verification::Mismatch {
                    reason: format!("{} digest differs: source {} target {}", algorithm, src, dst),
                })
            }
        }
        DigestProbe::Unavailable { reason } => {
            warn!("Digest unavailable for {} ({}), falling back to size check", path, reason);
            match compare_sizes(source, target, path).await {
                Ok(true) => Ok(Verification::SizeMatchedOnly),
                Ok(false) => Ok(Verification::Mismatch {
                    reason: "size differs".to_string(),
                }),
                Err(e) => Ok(Verification::Mismatch {
                    reason: format!("integrity could not be established: {}", e),
                }),
            }
        }
    }
}
