//! TaskHub scheduling: queue membership, dispatch weights, and the
//! two-tier claim algorithm (strict priority, then weighted stochastic
//! selection within the top tier).

use std::collections::BTreeMap;

use alchemd_common::{
    AlchemicalNetwork, Scope, ScopedKey, StateError, TaskHub, Tokenizable,
    TASKHUB_DEFAULT_WEIGHT,
};
use neo4rs::query;
use rand::Rng;
use tracing::info;

use crate::store::{run_rows, txn_rows, StateStore};

/// Default dispatch weight of a freshly queued task.
const ACTIONS_DEFAULT_WEIGHT: f64 = 1.0;

/// Weight assignment accepted by [`StateStore::set_task_weights`]: either
/// per-task weights, or a list of tasks sharing one scalar passed alongside.
#[derive(Debug, Clone)]
pub enum TaskWeights {
    Map(BTreeMap<ScopedKey, f64>),
    List(Vec<ScopedKey>),
}

/// Weighted stochastic pick from a pool of (task, weight) pairs, given a
/// uniform draw in [0, 1). Returns None when no weight is positive: a tier
/// whose weights are all zero is frozen, not an error.
pub(crate) fn select_from_pool(pool: &[(String, f64)], draw: f64) -> Option<&str> {
    let total: f64 = pool.iter().map(|(_, weight)| weight).sum();
    if total <= 0.0 {
        return None;
    }
    let mut cumulative = 0.0;
    for (task, weight) in pool {
        cumulative += weight / total;
        if draw < cumulative {
            return Some(task);
        }
    }
    // floating-point shortfall at draw ~ 1.0
    pool.iter()
        .rev()
        .find(|(_, weight)| *weight > 0.0)
        .map(|(task, _)| task.as_str())
}

impl StateStore {
    /// Create the taskhub for a network, or return the existing one: a
    /// network has exactly one hub. The hub's token is derived from the
    /// network key, so concurrent creators converge on the same scoped key
    /// and the content-keyed MERGE makes the insert idempotent.
    pub async fn create_taskhub(&self, network: &ScopedKey) -> Result<ScopedKey, StateError> {
        if network.class_name() != AlchemicalNetwork::CLASS {
            return Err(StateError::InvalidRequest(format!(
                "not an AlchemicalNetwork key: {network}"
            )));
        }

        let scope = network.scope();
        let (org, campaign, project) = Self::concrete(&scope)?;
        let hub = TaskHub::new(network.to_string());
        let hub_sk = ScopedKey::new(hub.gufe_key(), &scope)?;

        let q = query(
            "MATCH (an:AlchemicalNetwork {_scoped_key: $network})
             MERGE (th:GufeTokenizable {_scoped_key: $hub})
             ON CREATE SET th:TaskHub,
                 th._gufe_key = $gufe_key,
                 th._org = $org, th._campaign = $campaign, th._project = $project,
                 th._json_props = [],
                 th.network = $network,
                 th.weight = $weight
             MERGE (th)-[r:PERFORMS]->(an)
             SET r._org = $org, r._campaign = $campaign, r._project = $project
             RETURN th._scoped_key AS sk",
        )
        .param("network", network.to_string())
        .param("hub", hub_sk.to_string())
        .param("gufe_key", hub.gufe_key().to_string())
        .param("org", org.as_str())
        .param("campaign", campaign.as_str())
        .param("project", project.as_str())
        .param("weight", TASKHUB_DEFAULT_WEIGHT);

        if run_rows(&self.client.graph, q).await? == 0 {
            return Err(StateError::NotFound(network.to_string()));
        }

        info!("taskhub {hub_sk} ready for network {network}");
        Ok(hub_sk)
    }

    pub async fn query_taskhubs(&self, scope: &Scope) -> Result<Vec<ScopedKey>, StateError> {
        self.query_keys(TaskHub::CLASS, None, None, scope).await
    }

    pub async fn get_taskhub(&self, network: &ScopedKey) -> Result<ScopedKey, StateError> {
        let q = query(
            "MATCH (th:TaskHub {network: $network})-[:PERFORMS]->(an:AlchemicalNetwork)
             RETURN th._scoped_key AS sk",
        )
        .param("network", network.to_string());

        let mut keys = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let sk: String = row.get("sk")?;
            keys.push(sk);
        }
        match keys.len() {
            0 => Err(StateError::NotFound(format!("taskhub for {network}"))),
            1 => keys.remove(0).parse(),
            _ => Err(StateError::DuplicateFound(format!("taskhub for {network}"))),
        }
    }

    pub async fn get_taskhub_weight(&self, network: &ScopedKey) -> Result<f64, StateError> {
        let q = query("MATCH (th:TaskHub {network: $network}) RETURN th.weight AS weight")
            .param("network", network.to_string());
        let mut stream = self.client.graph.execute(q).await?;
        let Some(row) = stream.next().await? else {
            return Err(StateError::NotFound(format!("taskhub for {network}")));
        };
        Ok(row.get("weight")?)
    }

    /// Set the hub's own fairness weight among hubs.
    pub async fn set_taskhub_weight(
        &self,
        network: &ScopedKey,
        weight: f64,
    ) -> Result<(), StateError> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(StateError::InvalidRequest(format!(
                "taskhub weight must be finite and non-negative, got {weight}"
            )));
        }
        let q = query(
            "MATCH (th:TaskHub {network: $network}) SET th.weight = $weight RETURN th._scoped_key AS sk",
        )
        .param("network", network.to_string())
        .param("weight", weight);
        if run_rows(&self.client.graph, q).await? == 0 {
            return Err(StateError::NotFound(format!("taskhub for {network}")));
        }
        Ok(())
    }

    pub async fn delete_taskhub(&self, network: &ScopedKey) -> Result<ScopedKey, StateError> {
        let hub = self.get_taskhub(network).await?;
        self.client
            .graph
            .run(
                query("MATCH (th:TaskHub {_scoped_key: $sk}) DETACH DELETE th")
                    .param("sk", hub.to_string()),
            )
            .await?;
        info!("deleted taskhub {hub}");
        Ok(hub)
    }

    /// Put tasks on a hub's queue. Each task must perform a transformation
    /// belonging to the hub's network, and a task extending another is only
    /// accepted once its predecessor is complete. Re-queueing an already
    /// actioned task is a no-op.
    pub async fn queue_taskhub_tasks(
        &self,
        tasks: &[ScopedKey],
        taskhub: &ScopedKey,
    ) -> Result<Vec<ScopedKey>, StateError> {
        for task in tasks {
            let mut txn = self.client.graph.start_txn().await?;
            let outcome: Result<(), StateError> = async {
                let create = query(
                    "MATCH (th:TaskHub {_scoped_key: $taskhub})-[:PERFORMS]->(an:AlchemicalNetwork)
                     MATCH (tn:Task {_scoped_key: $task})-[:PERFORMS]->(tf:Transformation)<-[:DEPENDS_ON]-(an)
                     OPTIONAL MATCH (tn)-[:EXTENDS]->(prev:Task)
                     WITH DISTINCT th, tn, prev
                     WHERE NOT (th)-[:ACTIONS {taskhub: $taskhub}]->(tn)
                       AND (prev IS NULL OR prev.status = 'complete')
                     CREATE (th)-[ar:ACTIONS {taskhub: $taskhub, weight: $weight, parent_task: $task}]->(tn)
                     RETURN tn._scoped_key AS sk",
                )
                .param("taskhub", taskhub.to_string())
                .param("task", task.to_string())
                .param("weight", ACTIONS_DEFAULT_WEIGHT);

                if txn_rows(&mut txn, create).await? > 0 {
                    return Ok(());
                }

                // nothing created: find out why before deciding it is fine
                let diagnose = query(
                    "MATCH (th:TaskHub {_scoped_key: $taskhub})-[:PERFORMS]->(an:AlchemicalNetwork)
                     MATCH (tn:Task {_scoped_key: $task})
                     OPTIONAL MATCH (tn)-[:PERFORMS]->(tf:Transformation)<-[:DEPENDS_ON]-(an)
                     OPTIONAL MATCH (tn)-[:EXTENDS]->(prev:Task)
                     RETURN tf IS NOT NULL AS member,
                            EXISTS { (th)-[:ACTIONS {taskhub: $taskhub}]->(tn) } AS queued,
                            prev.status AS prev_status",
                )
                .param("taskhub", taskhub.to_string())
                .param("task", task.to_string());

                let mut stream = txn.execute(diagnose).await?;
                let Some(row) = stream.next(txn.handle()).await? else {
                    return Err(StateError::NotFound(format!(
                        "taskhub {taskhub} or task {task}"
                    )));
                };
                let member: bool = row.get("member")?;
                let queued: bool = row.get("queued")?;
                let prev_status: Option<String> = row.get("prev_status")?;
                while stream.next(txn.handle()).await?.is_some() {}

                if !member {
                    return Err(StateError::Membership {
                        task: task.to_string(),
                        taskhub: taskhub.to_string(),
                    });
                }
                if queued {
                    // already on this hub's queue
                    return Ok(());
                }
                Err(StateError::InvalidRequest(format!(
                    "task {task} extends a task whose status is {}, not complete",
                    prev_status.as_deref().unwrap_or("unknown")
                )))
            }
            .await;

            match outcome {
                Ok(()) => txn.commit().await?,
                Err(e) => {
                    let _ = txn.rollback().await;
                    return Err(e);
                }
            }
        }

        Ok(tasks.to_vec())
    }

    /// Set dispatch weights on the ACTIONS edges between a hub and its
    /// tasks. Weights express relative claim frequency within a priority
    /// tier; zero disables a task without dequeueing it.
    pub async fn set_task_weights(
        &self,
        tasks: TaskWeights,
        taskhub: &ScopedKey,
        weight: Option<f64>,
    ) -> Result<(), StateError> {
        let pairs: Vec<(ScopedKey, f64)> = match (tasks, weight) {
            (TaskWeights::Map(_), Some(_)) => {
                return Err(StateError::InvalidRequest(
                    "cannot combine per-task weights with a scalar weight".to_string(),
                ));
            }
            (TaskWeights::List(_), None) => {
                return Err(StateError::InvalidRequest(
                    "a task list requires a scalar weight".to_string(),
                ));
            }
            (TaskWeights::Map(map), None) => map.into_iter().collect(),
            (TaskWeights::List(list), Some(w)) => list.into_iter().map(|t| (t, w)).collect(),
        };
        if let Some((task, bad)) = pairs
            .iter()
            .find(|(_, w)| !(w.is_finite() && *w >= 0.0))
        {
            return Err(StateError::InvalidRequest(format!(
                "weight for {task} must be finite and non-negative, got {bad}"
            )));
        }

        let mut txn = self.client.graph.start_txn().await?;
        let outcome: Result<(), StateError> = async {
            for (task, w) in &pairs {
                let q = query(
                    "MATCH (th:TaskHub {_scoped_key: $taskhub})-[ar:ACTIONS]->(t:Task {_scoped_key: $task})
                     SET ar.weight = $weight
                     RETURN t._scoped_key AS sk",
                )
                .param("taskhub", taskhub.to_string())
                .param("task", task.to_string())
                .param("weight", *w);
                if txn_rows(&mut txn, q).await? == 0 {
                    return Err(StateError::NotFound(format!(
                        "no ACTIONS edge from {taskhub} to {task}"
                    )));
                }
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => txn.commit().await?,
            Err(e) => {
                let _ = txn.rollback().await;
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn get_task_weights(
        &self,
        tasks: &[ScopedKey],
        taskhub: &ScopedKey,
    ) -> Result<BTreeMap<ScopedKey, f64>, StateError> {
        let keys: Vec<String> = tasks.iter().map(|t| t.to_string()).collect();
        let q = query(
            "MATCH (th:TaskHub {_scoped_key: $taskhub})-[ar:ACTIONS]->(t:Task)
             WHERE t._scoped_key IN $tasks
             RETURN t._scoped_key AS sk, ar.weight AS weight",
        )
        .param("taskhub", taskhub.to_string())
        .param("tasks", keys);

        let mut weights = BTreeMap::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let sk: String = row.get("sk")?;
            let weight: f64 = row.get("weight")?;
            weights.insert(sk.parse()?, weight);
        }
        Ok(weights)
    }

    pub async fn get_taskhub_tasks(
        &self,
        taskhub: &ScopedKey,
    ) -> Result<Vec<ScopedKey>, StateError> {
        let q = query(
            "MATCH (th:TaskHub {_scoped_key: $taskhub})-[:ACTIONS]->(t:Task)
             RETURN t._scoped_key AS sk",
        )
        .param("taskhub", taskhub.to_string());

        let mut keys = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let sk: String = row.get("sk")?;
            keys.push(sk.parse()?);
        }
        Ok(keys)
    }

    pub async fn get_taskhub_unclaimed_tasks(
        &self,
        taskhub: &ScopedKey,
    ) -> Result<Vec<ScopedKey>, StateError> {
        let q = query(
            "MATCH (th:TaskHub {_scoped_key: $taskhub})-[:ACTIONS]->(t:Task)
             WHERE t.claim IS NULL
             RETURN t._scoped_key AS sk",
        )
        .param("taskhub", taskhub.to_string());

        let mut keys = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let sk: String = row.get("sk")?;
            keys.push(sk.parse()?);
        }
        Ok(keys)
    }

    /// Take tasks off a hub's queue. Only the ACTIONS edges are removed;
    /// the tasks themselves live on.
    pub async fn dequeue_taskhub_tasks(
        &self,
        tasks: &[ScopedKey],
        taskhub: &ScopedKey,
    ) -> Result<Vec<ScopedKey>, StateError> {
        let mut txn = self.client.graph.start_txn().await?;
        let outcome: Result<(), StateError> = async {
            for task in tasks {
                let q = query(
                    "MATCH (th:TaskHub {_scoped_key: $taskhub})-[ar:ACTIONS]->(t:Task {_scoped_key: $task})
                     DELETE ar",
                )
                .param("taskhub", taskhub.to_string())
                .param("task", task.to_string());
                txn.run(q).await?;
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => txn.commit().await?,
            Err(e) => {
                let _ = txn.rollback().await;
                return Err(e);
            }
        }
        Ok(tasks.to_vec())
    }

    /// Claim up to `count` tasks for a worker. Each iteration finds the
    /// minimum priority among waiting actioned tasks, samples that tier by
    /// edge weight, and atomically marks the chosen task running under the
    /// claimant. A slot where nothing is claimable yields None.
    ///
    /// The whole loop is one transaction: the status guard on the claim
    /// write and the database's conflict detection keep a task from being
    /// handed to two workers.
    pub async fn claim_taskhub_tasks(
        &self,
        taskhub: &ScopedKey,
        claimant: &str,
        count: usize,
    ) -> Result<Vec<Option<ScopedKey>>, StateError> {
        let mut txn = self.client.graph.start_txn().await?;
        let outcome: Result<Vec<Option<ScopedKey>>, StateError> = async {
            let mut claimed: Vec<Option<ScopedKey>> = Vec::with_capacity(count);

            for _ in 0..count {
                let pool_q = query(
                    "MATCH (th:TaskHub {_scoped_key: $taskhub})-[:ACTIONS]->(wt:Task)
                     WHERE wt.status = 'waiting'
                     WITH MIN(wt.priority) AS min_priority
                     MATCH (th:TaskHub {_scoped_key: $taskhub})-[ar:ACTIONS]->(t:Task)
                     WHERE t.status = 'waiting' AND t.priority = min_priority
                     RETURN ar.parent_task AS parent_task, ar.weight AS weight",
                )
                .param("taskhub", taskhub.to_string());

                let mut pool: Vec<(String, f64)> = Vec::new();
                let mut stream = txn.execute(pool_q).await?;
                while let Some(row) = stream.next(txn.handle()).await? {
                    let parent_task: String = row.get("parent_task")?;
                    let weight: f64 = row.get("weight")?;
                    pool.push((parent_task, weight));
                }

                let draw: f64 = rand::rng().random();
                let Some(chosen) = select_from_pool(&pool, draw) else {
                    claimed.push(None);
                    continue;
                };
                let chosen = chosen.to_string();

                // the guard re-checks the status inside the write, and LIMIT 1
                // keeps a single statement from claiming twice
                let claim_q = query(
                    "MATCH (t:Task {_scoped_key: $task})
                     WHERE t.status = 'waiting'
                     WITH t LIMIT 1
                     SET t.status = 'running', t.claim = $claimant
                     RETURN t._scoped_key AS sk",
                )
                .param("task", chosen.as_str())
                .param("claimant", claimant);

                let mut sk: Option<String> = None;
                let mut stream = txn.execute(claim_q).await?;
                while let Some(row) = stream.next(txn.handle()).await? {
                    sk = Some(row.get("sk")?);
                }
                claimed.push(match sk {
                    Some(sk) => Some(sk.parse()?),
                    None => None,
                });
            }

            Ok(claimed)
        }
        .await;

        match outcome {
            Ok(claimed) => {
                txn.commit().await?;
                let taken = claimed.iter().filter(|c| c.is_some()).count();
                info!("claimant '{claimant}' took {taken}/{count} tasks from {taskhub}");
                Ok(claimed)
            }
            Err(e) => {
                let _ = txn.rollback().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::select_from_pool;

    fn pool(weights: &[f64]) -> Vec<(String, f64)> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("task-{i}"), *w))
            .collect()
    }

    #[test]
    fn empty_pool_selects_nothing() {
        assert_eq!(select_from_pool(&[], 0.5), None);
    }

    #[test]
    fn all_zero_weights_freeze_the_tier() {
        let p = pool(&[0.0, 0.0, 0.0]);
        for draw in [0.0, 0.3, 0.999] {
            assert_eq!(select_from_pool(&p, draw), None);
        }
    }

    #[test]
    fn single_positive_weight_always_wins() {
        let p = pool(&[0.0, 7.5, 0.0]);
        for draw in [0.0, 0.5, 0.999] {
            assert_eq!(select_from_pool(&p, draw), Some("task-1"));
        }
    }

    #[test]
    fn draw_walks_the_cumulative_distribution() {
        let p = pool(&[1.0, 2.0, 1.0]);
        // normalized cumulative boundaries: 0.25, 0.75, 1.0
        assert_eq!(select_from_pool(&p, 0.1), Some("task-0"));
        assert_eq!(select_from_pool(&p, 0.25), Some("task-1"));
        assert_eq!(select_from_pool(&p, 0.74), Some("task-1"));
        assert_eq!(select_from_pool(&p, 0.75), Some("task-2"));
        assert_eq!(select_from_pool(&p, 0.999), Some("task-2"));
    }

    #[test]
    fn boundary_draw_falls_back_to_last_positive() {
        let p = pool(&[1.0, 1.0, 0.0]);
        assert_eq!(select_from_pool(&p, 1.0), Some("task-1"));
    }

    #[test]
    fn zero_weight_task_is_never_selected() {
        let p = pool(&[0.0, 1.0, 1.0]);
        for i in 0..100 {
            let draw = i as f64 / 100.0;
            assert_ne!(select_from_pool(&p, draw), Some("task-0"));
        }
    }
}
