//! Namespace tree: creation, re-parenting and the acyclicity guard.

use std::collections::HashSet;

use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::rbac::Namespace;
use crate::store::RbacStore;

/// Walks upward from `start` and fails if `node` is met on the way.
///
/// A visited set bounds the walk, so a chain that already loops in storage
/// reports a cycle instead of spinning.
pub async fn ensure_not_ancestor(store: &dyn RbacStore, node: Uuid, start: Uuid) -> AppResult<()> {
    let mut visited = HashSet::new();
    let mut current = Some(start);

    while let Some(id) = current {
        if id == node {
            return Err(AppError::cyclic_dependency(format!(
                "namespace {node} would become its own ancestor"
            )));
        }
        if !visited.insert(id) {
            return Err(AppError::cyclic_dependency(format!(
                "namespace chain above {start} already loops at {id}"
            )));
        }
        current = match store.get_namespace(id).await {
            Ok(namespace) => namespace.parent_id,
            Err(AppError::NotFound(_)) => {
                return Err(AppError::invalid_namespace(format!(
                    "parent namespace {id} does not exist"
                )));
            }
            Err(other) => return Err(other),
        };
    }

    Ok(())
}

pub async fn get_namespace(store: &dyn RbacStore, id: Uuid) -> AppResult<Namespace> {
    store.get_namespace(id).await
}

pub async fn get_children(store: &dyn RbacStore, parent_id: Uuid) -> AppResult<Vec<Namespace>> {
    store.get_namespace_children(parent_id).await
}

pub async fn create_namespace(store: &dyn RbacStore, node: &Namespace) -> AppResult<Namespace> {
    if node.name.trim().is_empty() {
        return Err(AppError::invalid_namespace("namespace name must not be empty"));
    }
    if let Some(parent_id) = node.parent_id {
        ensure_not_ancestor(store, node.id, parent_id).await?;
    }

    let created = store.create_namespace(node).await?;
    tracing::info!(
        namespace_id = %created.id,
        parent_id = ?created.parent_id,
        name = %created.name,
        "namespace created"
    );
    Ok(created)
}

/// Moves `id` under `new_parent`, or makes it a root when `None`.
pub async fn move_namespace(
    store: &dyn RbacStore,
    id: Uuid,
    new_parent: Option<Uuid>,
) -> AppResult<(Namespace, Namespace)> {
    let before = store.get_namespace(id).await?;
    if let Some(parent_id) = new_parent {
        ensure_not_ancestor(store, id, parent_id).await?;
    }

    let after = store.set_namespace_parent(id, new_parent).await?;
    tracing::info!(
        namespace_id = %id,
        from = ?before.parent_id,
        to = ?after.parent_id,
        "namespace moved"
    );
    Ok((before, after))
}
