use crate::orchestrate::relocate;
use crate::{Operation, TransferOptions};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use wharf_provider::error::{ErrorKind, Result};
use wharf_provider::{Conflict, DeleteOptions, FolderMetadata, Provider, ProviderHandle, ProviderPath};

/// Recreate the folder `src_path` at `target`, then transfer every child
/// into it.
///
/// The source listing is read in full before any child starts. Children run
/// up to `options.concurrency` at a time; a failing child does not stop its
/// siblings and nothing already written is rolled back. For a move, the
/// source folder is deleted only when every child succeeded.
///
/// A partial failure lists the deepest paths that failed and the shallowest
/// that fully succeeded: a subfolder that partly failed contributes its own
/// descendants instead of itself.
pub(crate) async fn transfer_folder(
    operation: Operation,
    src: &ProviderHandle,
    src_path: &ProviderPath,
    dest: &ProviderHandle,
    target: &ProviderPath,
    existed: bool,
    options: &TransferOptions,
) -> Result<FolderMetadata> {
    if existed {
        dest.delete(target, DeleteOptions::default()).await?;
    }
    let created = dest.create_folder(target, false).await?;
    let children = src.children(src_path).await?;
    tracing::debug!(source = %src_path, %target, children = children.len(), "Transferring folder");

    let mut futures: Vec<_> = children
        .into_iter()
        .map(|child| transfer_child(operation, src, child.path().clone(), dest, created.path(), options))
        .collect();
    let concurrency = options.concurrency.max(1);
    let mut processing = FuturesUnordered::new();
    processing.extend(futures.drain(..concurrency.min(futures.len())));
    let (mut succeeded, mut failed) = (Vec::new(), Vec::new());
    while let Some((child, result)) = processing.next().await {
        match result {
            Ok(()) => succeeded.push(child),
            Err(err) => {
                let kind: &ErrorKind = &err;
                tracing::warn!(%child, error = %kind, "Child transfer failed");
                match kind {
                    ErrorKind::IntraCopy { failed: below, succeeded: done }
                    | ErrorKind::IntraMove { failed: below, succeeded: done }
                        if !below.is_empty() =>
                    {
                        failed.extend(below.iter().cloned());
                        succeeded.extend(done.iter().cloned());
                    },
                    _ => failed.push(child),
                }
            },
        }
        // Pop-n-push, FIFO.
        if !futures.is_empty() {
            processing.push(futures.remove(0));
        }
    }

    if !failed.is_empty() {
        failed.sort();
        succeeded.sort();
        exn::bail!(match operation {
            Operation::Copy => ErrorKind::IntraCopy { failed, succeeded },
            Operation::Move => ErrorKind::IntraMove { failed, succeeded },
        });
    }
    if operation == Operation::Move {
        src.delete(src_path, DeleteOptions::default())
            .await
            .or_raise(|| ErrorKind::MoveIncomplete(target.to_string()))?;
    }
    // `target` may still carry the identifier of a replaced folder.
    match dest.metadata(created.path()).await?.into_folder() {
        Some(folder) => Ok(folder),
        None => exn::bail!(ErrorKind::NotFound(target.to_string())),
    }
}

/// Transfer one child into `parent`, replacing whatever is already there.
async fn transfer_child(
    operation: Operation,
    src: &ProviderHandle,
    child: ProviderPath,
    dest: &ProviderHandle,
    parent: &ProviderPath,
    options: &TransferOptions,
) -> (String, Result<()>) {
    let result = async {
        let (target, existed) = dest.handle_naming(&child, parent, None, Conflict::Replace).await?;
        relocate(operation, src, &child, dest, &target, existed, options).await?;
        Ok(())
    }
    .await;
    (child.to_string(), result)
}
