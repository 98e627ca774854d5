use super::{json_column, Pool, StoreError};
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Owner of a test suite. `color` is presentation-only and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    pub repository: String,
    pub default_target: String,
    /// Tag vocabulary offered when scoping a run.
    #[serde(default)]
    pub tags: Vec<String>,
}

const PROJECT_COLUMNS: &str = "id, name, description, color, repository, default_target, tags_json";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let tags_json: String = row.get(6)?;
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        repository: row.get(4)?,
        default_target: row.get(5)?,
        tags: json_column(6, &tags_json)?,
    })
}

/// Slugs are lowercase ASCII letters, digits, `-` and `_`.
pub fn validate_slug(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::Invalid {
            field: "project id",
            reason: format!("'{}' is not a lowercase slug", id),
        })
    }
}

#[derive(Clone)]
pub struct ProjectStore {
    pool: Pool,
}

impl ProjectStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert or replace a project definition (seeding and admin updates).
    pub fn upsert_project(&self, project: &Project) -> Result<()> {
        validate_slug(&project.id)?;
        if project.repository.trim().is_empty() {
            return Err(StoreError::Invalid {
                field: "repository",
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO projects (id, name, description, color, repository, default_target, tags_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                color = excluded.color,
                repository = excluded.repository,
                default_target = excluded.default_target,
                tags_json = excluded.tags_json,
                updated_at = datetime('now')",
            params![
                project.id,
                project.name,
                project.description,
                project.color,
                project.repository,
                project.default_target,
                serde_json::to_string(&project.tags)?,
            ],
        )
        .with_context(|| format!("Failed to upsert project '{}'", project.id))?;

        Ok(())
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.pool.get()?;
        let project = conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![id],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM projects ORDER BY name, id",
            PROJECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], project_from_row)?;

        let mut list = Vec::new();
        for r in rows {
            list.push(r?);
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_in_memory;

    fn sample_project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            name: "Checkout".to_string(),
            description: "Checkout acceptance tests".to_string(),
            color: "#ff8800".to_string(),
            repository: "acme/checkout-tests".to_string(),
            default_target: "test".to_string(),
            tags: vec!["@smoke".to_string(), "@regression".to_string()],
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = ProjectStore::new(open_in_memory().unwrap());
        let mut project = sample_project("checkout");
        store.upsert_project(&project).unwrap();

        assert_eq!(store.get_project("checkout").unwrap(), Some(project.clone()));

        project.color = "#000000".to_string();
        project.tags.clear();
        store.upsert_project(&project).unwrap();
        assert_eq!(store.get_project("checkout").unwrap(), Some(project));
        assert_eq!(store.list_projects().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_project() {
        let store = ProjectStore::new(open_in_memory().unwrap());
        assert_eq!(store.get_project("nope").unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_slug() {
        let store = ProjectStore::new(open_in_memory().unwrap());
        let err = store.upsert_project(&sample_project("Not A Slug")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Invalid { .. })
        ));
    }
}
