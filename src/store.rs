use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::model::task::{EntityId, TaskTree, TicketMetadata};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Tasks file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Task {0} not found in tasks file")]
    EntityNotFound(EntityId),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read the task tree from disk. A missing file is an error, not an empty tree.
pub fn read_tasks(path: &Path) -> Result<TaskTree, StoreError> {
    if !path.exists() {
        return Err(StoreError::Missing(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the task tree via temp file + rename so readers never see a partial file.
pub fn write_tasks(path: &Path, tree: &TaskTree) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let json = serde_json::to_string_pretty(tree).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))?;
    Ok(())
}

/// Re-read the file, apply `f` to one entity's metadata and write it straight back.
///
/// Keeps the window in which another process could clobber the change as small
/// as possible; there is no lock, so concurrent writers still race.
pub fn update_metadata<F>(path: &Path, id: EntityId, f: F) -> Result<TicketMetadata, StoreError>
where
    F: FnOnce(&mut TicketMetadata),
{
    let mut tree = read_tasks(path)?;
    let metadata = tree
        .metadata_mut(id)
        .ok_or(StoreError::EntityNotFound(id))?;
    f(metadata);
    let updated = metadata.clone();
    write_tasks(path, &tree)?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::Task;

    fn sample_tree() -> TaskTree {
        serde_json::from_str(
            r#"{"tasks":[{"id":1,"title":"Setup","subtasks":[{"id":1,"title":"Repo"}]}],"meta":{"projectName":"demo"}}"#,
        )
        .unwrap()
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_tasks(&dir.path().join("tasks.json")).unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read_tasks(&path), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn write_then_read_keeps_unknown_top_level_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.json");
        write_tasks(&path, &sample_tree()).unwrap();

        let tree = read_tasks(&path).unwrap();
        assert_eq!(tree.tasks.len(), 1);
        assert!(tree.extra.contains_key("meta"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn update_metadata_persists_subtask_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        write_tasks(&path, &sample_tree()).unwrap();

        let id = EntityId::Subtask { parent: 1, id: 1 };
        let meta = update_metadata(&path, id, |m| m.remote_ticket_key = Some("PROJ-2".into())).unwrap();
        assert_eq!(meta.remote_ticket_key.as_deref(), Some("PROJ-2"));

        let tree = read_tasks(&path).unwrap();
        let task: &Task = tree.task(1).unwrap();
        assert_eq!(
            task.subtasks[0].metadata.remote_ticket_key.as_deref(),
            Some("PROJ-2")
        );
    }

    #[test]
    fn update_metadata_for_unknown_entity_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        write_tasks(&path, &sample_tree()).unwrap();

        let err = update_metadata(&path, EntityId::Task(9), |_| {}).unwrap_err();
        assert!(matches!(err, StoreError::EntityNotFound(EntityId::Task(9))));
    }
}
