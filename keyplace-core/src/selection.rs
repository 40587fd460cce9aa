use crate::config::SelectionKind;
use crate::error::AggregateError;
use crate::pool::NodePool;
use crate::registry::PlacementRegistry;
use crate::{KeyplaceError, Result};
use rand::seq::SliceRandom;

/// Policy choosing the node that receives a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSelection {
    /// Uniformly among all nodes.
    Random,
    /// The node holding the fewest keys, ties broken by pool order.
    LeastLoaded,
    /// Whatever the registry proposes.
    Registry,
}

impl From<SelectionKind> for NodeSelection {
    fn from(kind: SelectionKind) -> Self {
        match kind {
            SelectionKind::Random => Self::Random,
            SelectionKind::LeastLoaded => Self::LeastLoaded,
            SelectionKind::Registry => Self::Registry,
        }
    }
}

impl NodeSelection {
    pub async fn select_node_for_insert(
        &self,
        pool: &NodePool,
        registry: Option<&dyn PlacementRegistry>,
    ) -> Result<String> {
        if pool.is_empty() {
            return Err(KeyplaceError::NoNodesAvailable);
        }

        match self {
            Self::Random => pick_random(&pool.ids()),
            Self::LeastLoaded => select_least_loaded(pool).await,
            Self::Registry => {
                let registry = registry.ok_or_else(|| {
                    KeyplaceError::RegistryUnavailable(
                        "registry selection without a registry".to_string(),
                    )
                })?;
                let node_id = registry.suggest_node(&pool.ids()).await?;
                if !pool.contains(&node_id) {
                    return Err(KeyplaceError::UnknownNode(node_id));
                }
                Ok(node_id)
            }
        }
    }
}

fn pick_random(ids: &[String]) -> Result<String> {
    ids.choose(&mut rand::thread_rng())
        .cloned()
        .ok_or(KeyplaceError::NoNodesAvailable)
}

async fn select_least_loaded(pool: &NodePool) -> Result<String> {
    let fan_out = pool.record_counts().await;

    for failure in &fan_out.failures {
        tracing::warn!(
            "Failed fetching record count for node {}: {}",
            failure.node_id,
            failure.error
        );
    }

    let tally: Vec<(String, Option<u64>)> = pool
        .ids()
        .into_iter()
        .map(|node_id| {
            let count = fan_out.results.get(&node_id).copied();
            (node_id, count)
        })
        .collect();

    match pick_least_loaded(&tally) {
        Some(node_id) => Ok(node_id),
        None => match AggregateError::new(fan_out.failures) {
            Some(aggregate) => Err(aggregate.into()),
            None => Err(KeyplaceError::NoNodesAvailable),
        },
    }
}

/// Node with the strictly smallest count; the first one wins a tie.
/// Nodes whose count is unknown stay in the tally but are never chosen.
pub fn pick_least_loaded(tally: &[(String, Option<u64>)]) -> Option<String> {
    let mut best: Option<(&str, u64)> = None;
    for (node_id, count) in tally {
        let Some(count) = *count else {
            continue;
        };
        match best {
            Some((_, best_count)) if best_count <= count => {}
            _ => best = Some((node_id.as_str(), count)),
        }
    }
    best.map(|(node_id, _)| node_id.to_string())
}
