use crate::error::{ErrorKind, Result};
use crate::location::{self, Location};
use clap::{Args, Subcommand};
use exn::ResultExt;
use std::path::PathBuf;
use wharf_config::Config;
use wharf_job::{DefaultFactory, LogNotifier, ProviderFactory, Worker};
use wharf_provider::{Conflict, DeleteOptions, Metadata, Provider, ProviderHandle, ProviderPath, list_revisions};
use wharf_transfer::{Operation, TransferOptions, transfer};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List a folder
    Ls {
        #[arg(value_parser = location::parse)]
        location: Location,
    },
    /// Show metadata of a file or folder
    Stat {
        #[arg(value_parser = location::parse)]
        location: Location,
    },
    /// List the revisions of a file, most recent first
    Revisions {
        #[arg(value_parser = location::parse)]
        location: Location,
    },
    /// Create a folder
    Mkdir {
        #[arg(value_parser = location::parse)]
        location: Location,
        /// Fail if the folder already exists
        #[arg(long)]
        strict: bool,
    },
    /// Delete a file or folder
    Rm {
        #[arg(value_parser = location::parse)]
        location: Location,
        /// Required to delete the contents of a provider's root
        #[arg(long)]
        confirm_root: bool,
    },
    /// Copy a file or folder, possibly between providers
    Cp(TransferArgs),
    /// Move a file or folder, possibly between providers
    Mv(TransferArgs),
    /// Background job payloads
    #[command(subcommand)]
    Job(JobCommand),
}

#[derive(Debug, Args)]
pub struct TransferArgs {
    #[arg(value_parser = location::parse)]
    source: Location,
    /// A folder (trailing `/`) receives the source; anything else names it
    #[arg(value_parser = location::parse)]
    destination: Location,
    /// What to do when the destination exists: replace, keep or warn
    #[arg(long, default_value_t = Conflict::Replace)]
    conflict: Conflict,
    /// Name to give the destination inside a destination folder
    #[arg(long)]
    rename: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Execute a serialized job payload
    Run { payload: PathBuf },
}

/// Loaded configuration plus output preferences.
pub struct Context {
    pub config: Config,
    pub json: bool,
}

impl Context {
    fn provider(&self, name: &str) -> Result<ProviderHandle> {
        let config = self.config.provider(name).or_raise(|| ErrorKind::Config)?;
        DefaultFactory.build(name, config).or_raise(|| ErrorKind::Operation("connect"))
    }

    fn print(&self, metadata: &Metadata) -> Result<()> {
        match self.json {
            true => println!("{}", json(metadata)?),
            false => println!("{}", line(metadata)),
        }
        Ok(())
    }
}

impl Command {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        match self {
            Self::Ls { location } => {
                let provider = ctx.provider(&location.provider)?;
                let folder = resolve(&provider, &location.folder_path()).await?;
                let listing = provider.children(&folder).await.or_raise(|| ErrorKind::Operation("ls"))?;
                for entry in &listing {
                    ctx.print(entry)?;
                }
            },
            Self::Stat { location } => {
                let provider = ctx.provider(&location.provider)?;
                let path = resolve(&provider, &location.path).await?;
                let metadata = provider.metadata(&path).await.or_raise(|| ErrorKind::Operation("stat"))?;
                println!("{}", json(&metadata)?);
            },
            Self::Revisions { location } => {
                let provider = ctx.provider(&location.provider)?;
                let path = resolve(&provider, &location.path).await?;
                let revisions =
                    list_revisions(provider.as_ref(), &path).await.or_raise(|| ErrorKind::Operation("revisions"))?;
                for revision in &revisions {
                    match (ctx.json, revision.size) {
                        (true, _) => println!("{}", json(revision)?),
                        (false, Some(size)) => println!("{}\t{size}", revision.version),
                        (false, None) => println!("{}\t-", revision.version),
                    }
                }
            },
            Self::Mkdir { location, strict } => {
                let provider = ctx.provider(&location.provider)?;
                let path = provider
                    .validate_path(&location.folder_path())
                    .await
                    .or_raise(|| ErrorKind::Operation("mkdir"))?;
                let folder = provider.create_folder(&path, strict).await.or_raise(|| ErrorKind::Operation("mkdir"))?;
                ctx.print(&folder.into())?;
            },
            Self::Rm { location, confirm_root } => {
                let provider = ctx.provider(&location.provider)?;
                let path = resolve(&provider, &location.path).await?;
                let options = DeleteOptions { confirm_root };
                provider.delete(&path, options).await.or_raise(|| ErrorKind::Operation("rm"))?;
                tracing::info!(%location, "Deleted");
            },
            Self::Cp(args) => args.execute(Operation::Copy, ctx).await?,
            Self::Mv(args) => args.execute(Operation::Move, ctx).await?,
            Self::Job(JobCommand::Run { payload }) => {
                let body = tokio::fs::read_to_string(&payload)
                    .await
                    .or_raise(|| ErrorKind::Read(payload.display().to_string()))?;
                let worker = Worker::from_config(DefaultFactory, LogNotifier, &ctx.config);
                let report = worker.handle(&body).await.or_raise(|| ErrorKind::Read(payload.display().to_string()))?;
                println!("{}", json(&report)?);
                if !report.outcome.is_success() {
                    exn::bail!(ErrorKind::Job(report.id.to_string()));
                }
            },
        }
        Ok(())
    }
}

impl TransferArgs {
    async fn execute(self, operation: Operation, ctx: &Context) -> Result<()> {
        let failed = || ErrorKind::Operation(match operation {
            Operation::Copy => "cp",
            Operation::Move => "mv",
        });
        let src = ctx.provider(&self.source.provider)?;
        let dest = ctx.provider(&self.destination.provider)?;
        let src_path = resolve(&src, &self.source.path).await?;
        let dest_path = dest.validate_path(&self.destination.path).await.or_raise(failed)?;
        let mut options =
            TransferOptions::default().with_conflict(self.conflict).with_concurrency(ctx.config.transfer.concurrency);
        options.rename = self.rename;
        let done = transfer(operation, &src, &src_path, &dest, &dest_path, &options).await.or_raise(failed)?;
        ctx.print(&done.metadata)
    }
}

/// Resolve a path that must already exist.
async fn resolve(provider: &ProviderHandle, raw: &str) -> Result<ProviderPath> {
    provider.validate_v1_path(raw).await.or_raise(|| ErrorKind::Operation("lookup"))
}

fn json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string(value).or_raise(|| ErrorKind::Operation("serialize"))
}

fn line(metadata: &Metadata) -> String {
    match metadata {
        Metadata::File(file) => format!("-\t{}\t{}", file.size, file.path()),
        Metadata::Folder(folder) => format!("d\t-\t{}", folder.path()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use wharf_config::ProviderConfig;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(subcommand)]
        command: Command,
    }

    fn context(root: &std::path::Path) -> Context {
        let mut config = Config::default();
        config.providers.insert("local".to_string(), ProviderConfig::filesystem(root));
        Context { config, json: false }
    }

    fn run_args(args: &[&str]) -> Command {
        let mut argv = vec!["wharf"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn test_transfer_flags() {
        let Command::Mv(args) = run_args(&["mv", "a:/x.txt", "b:/", "--conflict", "keep", "--rename", "y.txt"]) else {
            panic!("expected mv");
        };
        assert_eq!(args.conflict, Conflict::Keep);
        assert_eq!(args.rename.as_deref(), Some("y.txt"));
        assert_eq!(args.destination.path, "/");
    }

    #[test]
    fn test_rejects_bad_location() {
        assert!(Harness::try_parse_from(["wharf", "ls", "nowhere"]).is_err());
        assert!(Harness::try_parse_from(["wharf", "cp", "a:/x", "b:/", "--conflict", "merge"]).is_err());
    }

    #[tokio::test]
    async fn test_mkdir_cp_mv_rm() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        std::fs::write(dir.path().join("x.txt"), "hello").unwrap();

        run_args(&["mkdir", "local:/out"]).execute(&ctx).await.unwrap();
        assert!(dir.path().join("out").is_dir());
        run_args(&["cp", "local:/x.txt", "local:/out/"]).execute(&ctx).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("out/x.txt")).unwrap(), b"hello");
        run_args(&["mv", "local:/x.txt", "local:/out/", "--conflict", "keep"]).execute(&ctx).await.unwrap();
        assert!(!dir.path().join("x.txt").exists());
        assert!(dir.path().join("out/x (1).txt").exists());
        run_args(&["rm", "local:/out/"]).execute(&ctx).await.unwrap();
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_args(&["ls", "elsewhere:/"]).execute(&context(dir.path())).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_rm_root_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), "hello").unwrap();
        let ctx = context(dir.path());
        assert!(run_args(&["rm", "local:/"]).execute(&ctx).await.is_err());
        assert!(dir.path().join("x.txt").exists());
        run_args(&["rm", "local:/", "--confirm-root"]).execute(&ctx).await.unwrap();
        assert!(!dir.path().join("x.txt").exists());
    }

    #[tokio::test]
    async fn test_job_run_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let payload = wharf_job::JobPayload::new(
            Operation::Copy,
            wharf_job::Endpoint::new(ProviderConfig::filesystem(dir.path()), "/missing.txt"),
            wharf_job::Endpoint::new(ProviderConfig::filesystem(dir.path()), "/out/"),
        );
        let body = dir.path().join("job.json");
        std::fs::write(&body, payload.to_json().unwrap()).unwrap();
        let err = run_args(&["job", "run", body.to_str().unwrap()]).execute(&context(dir.path())).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Job(payload.id.to_string()));
    }
}
