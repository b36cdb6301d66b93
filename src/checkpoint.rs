//! Checkpoint persistence for producer position data.
//!
//! A producer only knows what it has published while it is running. Saving
//! its [`PositionData`] after each flush lets the next run resume the
//! upstream source right after the last acknowledged message, and gives
//! [`Producer::ensure_messages_published`](crate::Producer::ensure_messages_published)
//! the offsets it needs after an unclean shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use pipeline_producer::checkpoint::{Checkpoint, CheckpointManager};
//! use pipeline_producer::PositionData;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = CheckpointManager::new("checkpoint.json");
//!
//!     // Load existing checkpoint
//!     if let Some(checkpoint) = manager.load().await? {
//!         println!("Resuming after sequence {:?}", checkpoint.position_data.last_published_sequence);
//!     }
//!
//!     // Save new checkpoint
//!     let checkpoint = Checkpoint::new(PositionData::default(), 100);
//!     manager.save(&checkpoint).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::position::PositionData;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// A saved [`PositionData`] snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Position data of the last acknowledged batch
    pub position_data: PositionData,
    /// The timestamp when this checkpoint was created
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Number of messages published since startup
    pub message_count: u64,
}

/// Reads and writes a [`Checkpoint`] as a JSON file.
///
/// Writes go to a sibling `.tmp` file that is synced and then renamed over
/// the checkpoint, so a crash mid-write leaves the previous checkpoint in
/// place.
pub struct CheckpointManager {
    file_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: checkpoint_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Loads the checkpoint, or `None` on a first run.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the file cannot be read, [`Error::Config`] if it does
    /// not hold a checkpoint.
    ///
    /// ```rust,no_run
    /// # use pipeline_producer::checkpoint::CheckpointManager;
    /// # async fn example() -> pipeline_producer::Result<()> {
    /// let manager = CheckpointManager::new("checkpoint.json");
    ///
    /// match manager.load().await? {
    ///     Some(checkpoint) => println!("Offsets: {:?}", checkpoint.position_data.topic_to_offset_map),
    ///     None => println!("No checkpoint found, starting from beginning"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        let content = match fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint file found at {:?}", self.file_path);
                return Ok(None);
            }
            Err(e) => {
                error!("Failed to read checkpoint file: {}", e);
                return Err(Error::Io(e));
            }
        };

        let checkpoint = serde_json::from_str::<Checkpoint>(&content).map_err(|e| {
            error!("Failed to parse checkpoint file: {}", e);
            Error::Config(format!("Invalid checkpoint file {:?}: {}", self.file_path, e))
        })?;

        info!(
            topics = checkpoint.position_data.topic_to_offset_map.len(),
            message_count = checkpoint.message_count,
            "Loaded checkpoint written at {}",
            checkpoint.timestamp
        );
        Ok(Some(checkpoint))
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        debug!(
            last_sequence = ?checkpoint.position_data.last_published_sequence,
            "Saving checkpoint"
        );

        let temp_path = self.file_path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(checkpoint)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.file_path).await?;

        Ok(())
    }

    /// Removes the checkpoint so the next run starts from scratch.
    pub async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.file_path).await {
            Ok(()) => {
                info!("Deleted checkpoint file {:?}", self.file_path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Checkpoint {
    /// Creates a checkpoint stamped with the current time.
    ///
    /// ```rust
    /// use pipeline_producer::checkpoint::Checkpoint;
    /// use pipeline_producer::PositionData;
    ///
    /// let checkpoint = Checkpoint::new(PositionData::default(), 100);
    /// assert_eq!(checkpoint.message_count, 100);
    /// ```
    pub fn new(position_data: PositionData, message_count: u64) -> Self {
        Self {
            position_data,
            timestamp: chrono::Utc::now(),
            message_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn position_data(offset: i64) -> PositionData {
        let mut data = PositionData::default();
        data.last_published_sequence = Some(offset as u64);
        data.last_published_message_position_info = Some(json!({"row": offset}));
        data.topic_to_offset_map.insert("events".to_string(), offset);
        data
    }

    #[tokio::test]
    async fn test_checkpoint_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_path = temp_dir.path().join("checkpoint.json");

        let manager = CheckpointManager::new(&checkpoint_path);

        // Initially no checkpoint
        assert!(manager.load().await.unwrap().is_none());

        let checkpoint = Checkpoint::new(position_data(42), 100);
        manager.save(&checkpoint).await.unwrap();

        let loaded = manager.load().await.unwrap().unwrap();
        assert_eq!(loaded.position_data, position_data(42));
        assert_eq!(loaded.message_count, 100);
    }

    #[tokio::test]
    async fn test_checkpoint_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_path = temp_dir.path().join("checkpoint.json");

        let manager = CheckpointManager::new(&checkpoint_path);

        manager.save(&Checkpoint::new(position_data(10), 50)).await.unwrap();
        manager.save(&Checkpoint::new(position_data(30), 150)).await.unwrap();

        let loaded = manager.load().await.unwrap().unwrap();
        assert_eq!(loaded.position_data.offset("events"), Some(30));
        assert_eq!(loaded.message_count, 150);
        assert!(!checkpoint_path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_invalid_checkpoint_file() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_path = temp_dir.path().join("checkpoint.json");
        fs::write(&checkpoint_path, "{ not json").await.unwrap();

        let manager = CheckpointManager::new(&checkpoint_path);
        assert!(matches!(manager.load().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_delete_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_path = temp_dir.path().join("checkpoint.json");
        let manager = CheckpointManager::new(&checkpoint_path);

        manager.save(&Checkpoint::new(position_data(1), 1)).await.unwrap();
        manager.delete().await.unwrap();
        assert!(manager.load().await.unwrap().is_none());

        // Deleting a missing checkpoint is fine
        manager.delete().await.unwrap();
    }
}
