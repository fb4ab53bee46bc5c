//! Task creation, lineage, status, and results.

use alchemd_common::{
    GufeObject, ObjectStoreRef, ScopedKey, StateError, Task, TaskStatus, Tokenizable,
    Transformation,
};
use neo4rs::query;
use tracing::info;

use crate::codec;
use crate::store::{run_rows, txn_rows, StateStore};

impl StateStore {
    /// Create a task against a transformation, optionally extending a
    /// previous task's result. The task lives in the transformation's scope
    /// and starts waiting, unclaimed, at the default priority.
    pub async fn create_task(
        &self,
        transformation: &ScopedKey,
        extend_from: Option<&ScopedKey>,
    ) -> Result<ScopedKey, StateError> {
        if transformation.class_name() != Transformation::CLASS {
            return Err(StateError::InvalidRequest(format!(
                "not a Transformation key: {transformation}"
            )));
        }
        if let Some(prev) = extend_from {
            if prev.class_name() != Task::CLASS {
                return Err(StateError::InvalidRequest(format!(
                    "extend_from is not a Task key: {prev}"
                )));
            }
        }

        let scope = transformation.scope();
        let (org, campaign, project) = Self::concrete(&scope)?;
        let encoded = codec::encode(&GufeObject::Task(Task::new()), &scope)?;

        let mut txn = self.client.graph.start_txn().await?;
        let result: Result<(), StateError> = async {
            Self::merge_encoded(&mut txn, &encoded, &org, &campaign, &project).await?;

            // the MATCH doubles as the existence check on the transformation
            let performs = query(
                "MATCH (t:Task {_scoped_key: $task}), (tf:Transformation {_scoped_key: $tf})
                 MERGE (t)-[r:PERFORMS]->(tf)
                 SET r._org = $org, r._campaign = $campaign, r._project = $project
                 RETURN tf._scoped_key AS sk",
            )
            .param("task", encoded.root.as_str())
            .param("tf", transformation.to_string())
            .param("org", org.as_str())
            .param("campaign", campaign.as_str())
            .param("project", project.as_str());
            if txn_rows(&mut txn, performs).await? == 0 {
                return Err(StateError::NotFound(transformation.to_string()));
            }

            if let Some(prev) = extend_from {
                let extends = query(
                    "MATCH (t:Task {_scoped_key: $task}), (prev:Task {_scoped_key: $prev})
                     MERGE (t)-[r:EXTENDS]->(prev)
                     SET r._org = $org, r._campaign = $campaign, r._project = $project
                     RETURN prev._scoped_key AS sk",
                )
                .param("task", encoded.root.as_str())
                .param("prev", prev.to_string())
                .param("org", org.as_str())
                .param("campaign", campaign.as_str())
                .param("project", project.as_str());
                if txn_rows(&mut txn, extends).await? == 0 {
                    return Err(StateError::NotFound(prev.to_string()));
                }
            }

            Ok(())
        }
        .await;

        match result {
            Ok(()) => txn.commit().await?,
            Err(e) => {
                let _ = txn.rollback().await;
                return Err(e);
            }
        }

        let sk: ScopedKey = encoded.root.parse()?;
        info!("created task {sk} for transformation {transformation}");
        Ok(sk)
    }

    pub async fn set_task_priority(
        &self,
        task: &ScopedKey,
        priority: i64,
    ) -> Result<(), StateError> {
        let q = query(
            "MATCH (t:Task {_scoped_key: $sk}) SET t.priority = $priority RETURN t._scoped_key AS sk",
        )
        .param("sk", task.to_string())
        .param("priority", priority);
        if run_rows(&self.client.graph, q).await? == 0 {
            return Err(StateError::NotFound(task.to_string()));
        }
        Ok(())
    }

    pub async fn get_task_status(&self, task: &ScopedKey) -> Result<TaskStatus, StateError> {
        let q = query("MATCH (t:Task {_scoped_key: $sk}) RETURN t.status AS status")
            .param("sk", task.to_string());
        let mut stream = self.client.graph.execute(q).await?;
        let Some(row) = stream.next().await? else {
            return Err(StateError::NotFound(task.to_string()));
        };
        let status: String = row.get("status")?;
        status.parse().map_err(StateError::Codec)
    }

    /// Move a task through its state machine. The allowed-from guard rides
    /// in the update query, so a concurrent transition cannot be overwritten;
    /// an illegal move is rejected with the task unchanged.
    pub async fn set_task_status(
        &self,
        task: &ScopedKey,
        status: TaskStatus,
    ) -> Result<(), StateError> {
        let allowed: Vec<String> = status
            .allowed_from()
            .iter()
            .map(|s| s.to_string())
            .collect();

        // a task going back to waiting loses its claim
        let cypher = if status == TaskStatus::Waiting {
            "MATCH (t:Task {_scoped_key: $sk})
             WHERE t.status IN $allowed
             SET t.status = $status, t.claim = null
             RETURN t._scoped_key AS sk"
        } else {
            "MATCH (t:Task {_scoped_key: $sk})
             WHERE t.status IN $allowed
             SET t.status = $status
             RETURN t._scoped_key AS sk"
        };
        let q = query(cypher)
            .param("sk", task.to_string())
            .param("allowed", allowed)
            .param("status", status.to_string());

        if run_rows(&self.client.graph, q).await? == 0 {
            // unknown task, or a transition the table forbids
            let from = self.get_task_status(task).await?;
            return Err(StateError::StateTransition { from, to: status });
        }
        Ok(())
    }

    /// The transformation a task performs, plus the result descriptor of the
    /// task it extends, if any.
    pub async fn get_task_transformation(
        &self,
        task: &ScopedKey,
    ) -> Result<(Transformation, Option<ObjectStoreRef>), StateError> {
        let q = query(
            "MATCH (t:Task {_scoped_key: $sk})-[:PERFORMS]->(tf:Transformation)
             OPTIONAL MATCH (t)-[:EXTENDS]->(prev:Task)-[:RESULTS_IN]->(osr:ObjectStoreRef)
             RETURN tf._scoped_key AS transformation, osr._scoped_key AS result",
        )
        .param("sk", task.to_string());

        let mut rows = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let transformation: String = row.get("transformation")?;
            let result: Option<String> = row.get("result")?;
            rows.push((transformation, result));
        }

        let (transformation_sk, result_sk) = match rows.len() {
            0 => return Err(StateError::NotFound(task.to_string())),
            1 => rows.remove(0),
            _ => return Err(StateError::DuplicateFound(task.to_string())),
        };

        let transformation = self
            .get_gufe(&transformation_sk.parse()?)
            .await?
            .try_into()?;
        let result = match result_sk {
            Some(sk) => Some(self.get_gufe(&sk.parse()?).await?.try_into()?),
            None => None,
        };
        Ok((transformation, result))
    }

    /// Record a task's result descriptor. The `ObjectStoreRef` is
    /// content-addressed, so resubmitting the same result is a no-op.
    pub async fn set_task_result(
        &self,
        task: &ScopedKey,
        result: &ObjectStoreRef,
    ) -> Result<ScopedKey, StateError> {
        if task.class_name() != Task::CLASS {
            return Err(StateError::InvalidRequest(format!(
                "not a Task key: {task}"
            )));
        }

        let scope = task.scope();
        let (org, campaign, project) = Self::concrete(&scope)?;
        let encoded = codec::encode(&GufeObject::ObjectStoreRef(result.clone()), &scope)?;

        let mut txn = self.client.graph.start_txn().await?;
        let outcome: Result<(), StateError> = async {
            Self::merge_encoded(&mut txn, &encoded, &org, &campaign, &project).await?;

            let link = query(
                "MATCH (t:Task {_scoped_key: $task}), (osr:ObjectStoreRef {_scoped_key: $result})
                 MERGE (t)-[r:RESULTS_IN]->(osr)
                 SET r._org = $org, r._campaign = $campaign, r._project = $project
                 RETURN osr._scoped_key AS sk",
            )
            .param("task", task.to_string())
            .param("result", encoded.root.as_str())
            .param("org", org.as_str())
            .param("campaign", campaign.as_str())
            .param("project", project.as_str());
            if txn_rows(&mut txn, link).await? == 0 {
                return Err(StateError::NotFound(task.to_string()));
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

        encoded.root.parse()
    }
}
