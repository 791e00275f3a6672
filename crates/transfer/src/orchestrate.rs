use crate::folder::transfer_folder;
use crate::{Operation, Strategy, TransferOptions, Transferred};
use exn::ResultExt;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use tracing::instrument;
use wharf_provider::error::{ErrorKind, Result};
use wharf_provider::{Conflict, DeleteOptions, DownloadOptions, FileMetadata, Metadata, Provider, ProviderHandle, ProviderPath};
use wharf_stream::CancellationToken;

/// Copy or move `src_path` on `src` to `dest_path` on `dest`.
///
/// A folder `dest_path` receives the source under its own name (or
/// `options.rename`); a file `dest_path` names the destination itself.
/// The conflict policy is applied before any backend mutation. For a move,
/// the source is deleted only after the destination write succeeded, so a
/// failed write never loses data. A source that cannot be deleted after a
/// successful write is reported as
/// [`MoveIncomplete`](ErrorKind::MoveIncomplete), which is never retryable.
///
/// Cancelling `options.cancel` abandons whichever backend call is in
/// flight, on either side.
///
/// # Examples
///
/// ```no_run
/// use wharf_provider::{Conflict, ProviderHandle, ProviderPath};
/// use wharf_transfer::{Operation, TransferOptions, error::Result, transfer};
///
/// async fn archive(src: &ProviderHandle, dest: &ProviderHandle) -> Result<()> {
///     let from = src.validate_v1_path("/reports/2024.pdf").await?;
///     let into = dest.validate_v1_path("/archive/").await?;
///     let options = TransferOptions::default().with_conflict(Conflict::Keep);
///     let done = transfer(Operation::Move, src, &from, dest, &into, &options).await?;
///     println!("{} ({})", done.metadata.path(), done.strategy);
///     Ok(())
/// }
/// ```
#[instrument(skip_all, fields(
    %operation,
    from = src.name(),
    source = %src_path,
    to = dest.name(),
    destination = %dest_path,
))]
pub async fn transfer(
    operation: Operation,
    src: &ProviderHandle,
    src_path: &ProviderPath,
    dest: &ProviderHandle,
    dest_path: &ProviderPath,
    options: &TransferOptions,
) -> Result<Transferred> {
    let (target, existed) =
        dest.handle_naming(src_path, dest_path, options.rename.as_deref(), options.conflict).await?;
    if src.shares_storage_root(dest.as_ref()) && overlaps(src_path, &target) {
        exn::bail!(ErrorKind::OverwriteSelf(src_path.to_string()));
    }
    let (metadata, strategy) = relocate(operation, src, src_path, dest, &target, existed, options).await?;
    let metadata = match dest_path.is_folder() {
        true => listed_entry(dest.as_ref(), &target, metadata).await?,
        false => metadata,
    };
    tracing::info!(%strategy, target = %target, created = !existed, "Transfer complete");
    Ok(Transferred { metadata, created: !existed, strategy })
}

/// Whether writing `target` would clobber `src` on a shared storage root:
/// the same object, a folder into its own subtree, or a folder replacing one
/// of its ancestors.
fn overlaps(src: &ProviderPath, target: &ProviderPath) -> bool {
    src.normalized_path() == target.normalized_path()
        || (src.is_folder() && target.is_within(src))
        || (target.is_folder() && src.is_within(target))
}

/// Perform one transfer to an already-resolved `target`.
pub(crate) fn relocate<'a>(
    operation: Operation,
    src: &'a ProviderHandle,
    src_path: &'a ProviderPath,
    dest: &'a ProviderHandle,
    target: &'a ProviderPath,
    existed: bool,
    options: &'a TransferOptions,
) -> BoxFuture<'a, Result<(Metadata, Strategy)>> {
    async move {
        let native = src.shares_storage_root(dest.as_ref())
            && match operation {
                Operation::Copy => src.can_intra_copy(dest.as_ref(), src_path),
                Operation::Move => src.can_intra_move(dest.as_ref(), src_path),
            };
        if native {
            tracing::debug!(strategy = %Strategy::Native, source = %src_path, %target, "Relocating");
            let failed = vec![src_path.to_string()];
            let metadata = match operation {
                Operation::Copy => {
                    let cancelled = || ErrorKind::IntraCopy { failed, succeeded: vec![] };
                    unless_cancelled(&options.cancel, cancelled, src.intra_copy(dest.as_ref(), src_path, target)).await?
                },
                Operation::Move => {
                    let cancelled = || ErrorKind::IntraMove { failed, succeeded: vec![] };
                    unless_cancelled(&options.cancel, cancelled, src.intra_move(dest.as_ref(), src_path, target)).await?
                },
            };
            return Ok((metadata, Strategy::Native));
        }
        tracing::debug!(strategy = %Strategy::StreamThrough, source = %src_path, %target, "Relocating");
        let metadata: Metadata = match src_path.is_folder() {
            true => transfer_folder(operation, src, src_path, dest, target, existed, options).await?.into(),
            false => stream_file(operation, src.as_ref(), src_path, dest.as_ref(), target, options).await?.into(),
        };
        Ok((metadata, Strategy::StreamThrough))
    }
    .boxed()
}

async fn stream_file(
    operation: Operation,
    src: &dyn Provider,
    src_path: &ProviderPath,
    dest: &dyn Provider,
    target: &ProviderPath,
    options: &TransferOptions,
) -> Result<FileMetadata> {
    let cancel = &options.cancel;
    let stream = unless_cancelled(cancel, ErrorKind::download, src.download(src_path, DownloadOptions::default()))
        .await?
        .cancellable(cancel.clone());
    let declared = stream.declared_size();
    // The conflict policy was already applied to `target`.
    let (file, _) = unless_cancelled(cancel, ErrorKind::upload, dest.upload(stream, target, Conflict::Replace)).await?;
    tracing::debug!(bytes = file.size, declared, %target, "Streamed file");
    if operation == Operation::Move {
        src.delete(src_path, DeleteOptions::default())
            .await
            .or_raise(|| ErrorKind::MoveIncomplete(target.to_string()))?;
    }
    Ok(file)
}

/// Await `work` unless `cancel` fires first, in which case `work` is dropped
/// along with any stream it holds.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    cancelled: impl FnOnce() -> ErrorKind,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => exn::bail!(cancelled()),
        result = work => result,
    }
}

/// Re-read the destination's parent and return the entry for `target`,
/// matched by materialized path since some backends assign new identifiers
/// on copy.
async fn listed_entry(dest: &dyn Provider, target: &ProviderPath, fallback: Metadata) -> Result<Metadata> {
    let Some(parent) = target.parent() else {
        return Ok(fallback);
    };
    let listing = dest.list(&parent).await?;
    match listing.child(target) {
        Some(entry) => Ok(entry.clone()),
        None => {
            tracing::warn!(%target, "Transferred entry missing from parent listing");
            Ok(fallback)
        },
    }
}
