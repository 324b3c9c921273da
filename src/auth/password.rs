use anyhow::Context;
use tracing::error;

/// bcrypt work factor used unless `BCRYPT_COST` overrides it.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;
/// Lowest work factor bcrypt accepts (mirrors bcrypt's private `MIN_COST`).
pub const MIN_COST: u32 = 4;
/// Highest work factor bcrypt accepts (mirrors bcrypt's private `MAX_COST`).
pub const MAX_COST: u32 = 31;

/// Salted bcrypt hash, computed on the blocking pool so request tasks keep
/// being served while it runs.
pub async fn hash_password(plain: String, cost: u32) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
        .await
        .context("password hashing task failed")?
        .map_err(|e| {
            error!(error = %e, "bcrypt hash error");
            anyhow::Error::new(e).context("hash password")
        })
}
