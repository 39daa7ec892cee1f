use std::path::PathBuf;

use {
    albumrelay_config::RelayConfig,
    albumrelay_engine::CheckpointStore,
    clap::Subcommand,
};

#[derive(Subcommand)]
pub enum CheckpointAction {
    /// Print the saved checkpoint (0 when none).
    Show {
        /// Checkpoint file (overrides `<data_dir>/checkpoint.txt`).
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Overwrite the checkpoint, e.g. to replay or skip part of the history.
    Set {
        id: i64,
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

pub fn handle_checkpoint(config: &RelayConfig, action: CheckpointAction) -> anyhow::Result<()> {
    match action {
        CheckpointAction::Show { path } => {
            let store = store(config, path);
            println!("{} ({})", store.load(), store.path().display());
        },
        CheckpointAction::Set { id, path } => {
            anyhow::ensure!(id >= 0, "checkpoint must be a non-negative message id");
            let store = store(config, path);
            let previous = store.load();
            store.save(id)?;
            println!("Checkpoint {previous} -> {id} ({})", store.path().display());
        },
    }
    Ok(())
}

fn store(config: &RelayConfig, path: Option<PathBuf>) -> CheckpointStore {
    CheckpointStore::new(path.unwrap_or_else(|| config.storage.checkpoint_path()))
}
