//! Transactional repository over the graph: content-addressed upserts,
//! generic object retrieval, and the network-level operations.

use std::str::FromStr;

use alchemd_common::{
    AlchemicalNetwork, ChemicalSystem, GufeKey, GufeObject, Scope, ScopedKey, StateError,
    Tokenizable, Transformation,
};
use neo4rs::{query, Graph, Node, Query, Relation, Txn};
use tracing::info;

use crate::codec::{self, EncodedSubgraph, SubgraphBuf};
use crate::GraphClient;

/// The state store: every persisted workflow, task, queue and identity lives
/// behind this handle. All mutating operations are single transactions;
/// check-then-act conditions ride inside the queries themselves.
pub struct StateStore {
    pub(crate) client: GraphClient,
}

/// Drain a query inside a transaction, returning how many rows it produced.
pub(crate) async fn txn_rows(txn: &mut Txn, q: Query) -> Result<usize, StateError> {
    let mut stream = txn.execute(q).await?;
    let mut rows = 0;
    while stream.next(txn.handle()).await?.is_some() {
        rows += 1;
    }
    Ok(rows)
}

/// Drain an auto-commit query, returning how many rows it produced.
pub(crate) async fn run_rows(graph: &Graph, q: Query) -> Result<usize, StateError> {
    let mut stream = graph.execute(q).await?;
    let mut rows = 0;
    while stream.next().await?.is_some() {
        rows += 1;
    }
    Ok(rows)
}

impl StateStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    pub(crate) fn concrete(scope: &Scope) -> Result<(String, String, String), StateError> {
        match (&scope.org, &scope.campaign, &scope.project) {
            (Some(org), Some(campaign), Some(project)) => {
                Ok((org.clone(), campaign.clone(), project.clone()))
            }
            _ => Err(StateError::InvalidRequest(format!(
                "operation requires a concrete scope, got '{scope}'"
            ))),
        }
    }

    /// Merge an encoded subgraph inside the given transaction: nodes first,
    /// then the `DEPENDS_ON` edges between them.
    pub(crate) async fn merge_encoded(
        txn: &mut Txn,
        encoded: &EncodedSubgraph,
        org: &str,
        campaign: &str,
        project: &str,
    ) -> Result<(), StateError> {
        for node in &encoded.nodes {
            txn.run(codec::node_merge_query(node, org, campaign, project))
                .await?;
        }
        for edge in &encoded.edges {
            txn.run(codec::edge_merge_query(edge, org, campaign, project))
                .await?;
        }
        Ok(())
    }

    /// Encode and upsert a single object graph in its own transaction,
    /// returning the root's scoped key.
    pub(crate) async fn upsert_object(
        &self,
        obj: &GufeObject,
        scope: &Scope,
    ) -> Result<ScopedKey, StateError> {
        let (org, campaign, project) = Self::concrete(scope)?;
        let encoded = codec::encode(obj, scope)?;

        let mut txn = self.client.graph.start_txn().await?;
        match Self::merge_encoded(&mut txn, &encoded, &org, &campaign, &project).await {
            Ok(()) => txn.commit().await?,
            Err(e) => {
                let _ = txn.rollback().await;
                return Err(e);
            }
        }

        ScopedKey::from_str(&encoded.root)
    }

    /// Fetch and reconstruct any stored domain object by scoped key.
    pub async fn get_gufe(&self, scoped_key: &ScopedKey) -> Result<GufeObject, StateError> {
        let cypher = format!(
            "MATCH (n:{class} {{_scoped_key: $sk}})
             OPTIONAL MATCH (n)-[:DEPENDS_ON*0..]->(src:GufeTokenizable)-[r:DEPENDS_ON]->(dst:GufeTokenizable)
             RETURN n, src, r, dst",
            class = scoped_key.class_name()
        );
        let q = query(&cypher).param("sk", scoped_key.to_string());

        let mut buf = SubgraphBuf::new();
        let mut root = None;

        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let n: Node = row.get("n")?;
            let id = buf.absorb_node(n)?;
            root.get_or_insert(id);

            if let Some(src) = row.get::<Option<Node>>("src")? {
                buf.absorb_node(src)?;
                let dst: Node = row.get("dst")?;
                buf.absorb_node(dst)?;
                let rel: Relation = row.get("r")?;
                buf.absorb_edge(&rel)?;
            }
        }

        let Some(root) = root else {
            return Err(StateError::NotFound(scoped_key.to_string()));
        };
        buf.decode(root)
    }

    pub async fn check_existence(&self, scoped_key: &ScopedKey) -> Result<bool, StateError> {
        let cypher = format!(
            "MATCH (n:{class} {{_scoped_key: $sk}}) RETURN n._scoped_key AS sk",
            class = scoped_key.class_name()
        );
        let rows = run_rows(
            &self.client.graph,
            query(&cypher).param("sk", scoped_key.to_string()),
        )
        .await?;
        Ok(rows > 0)
    }

    /// Generic key query over one class label, filtered by optional name,
    /// gufe key, and (possibly wildcarded) scope.
    pub(crate) async fn query_keys(
        &self,
        class: &str,
        name: Option<&str>,
        key: Option<&GufeKey>,
        scope: &Scope,
    ) -> Result<Vec<ScopedKey>, StateError> {
        let mut conditions = Vec::new();
        if name.is_some() {
            conditions.push("n.name = $name");
        }
        if key.is_some() {
            conditions.push("n._gufe_key = $key");
        }
        if scope.org.is_some() {
            conditions.push("n._org = $org");
        }
        if scope.campaign.is_some() {
            conditions.push("n._campaign = $campaign");
        }
        if scope.project.is_some() {
            conditions.push("n._project = $project");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("\nWHERE {}", conditions.join(" AND "))
        };
        let cypher = format!("MATCH (n:{class}){where_clause}\nRETURN n._scoped_key AS sk");

        let mut q = query(&cypher);
        if let Some(name) = name {
            q = q.param("name", name);
        }
        if let Some(key) = key {
            q = q.param("key", key.to_string());
        }
        if let Some(org) = &scope.org {
            q = q.param("org", org.as_str());
        }
        if let Some(campaign) = &scope.campaign {
            q = q.param("campaign", campaign.as_str());
        }
        if let Some(project) = &scope.project {
            q = q.param("project", project.as_str());
        }

        let mut keys = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let sk: String = row.get("sk")?;
            keys.push(sk.parse()?);
        }
        Ok(keys)
    }

    /// Resolve a domain object to its scoped key within a scope. Fails with
    /// NotFound if absent; more than one match means the scoped-key
    /// uniqueness invariant is broken and is surfaced as DuplicateFound.
    pub async fn get_scoped_key(
        &self,
        obj: &GufeObject,
        scope: &Scope,
    ) -> Result<ScopedKey, StateError> {
        let key = obj.gufe_key();
        let mut keys = self
            .query_keys(obj.class_name(), None, Some(&key), scope)
            .await?;
        match keys.len() {
            0 => Err(StateError::NotFound(key.to_string())),
            1 => Ok(keys.remove(0)),
            _ => Err(StateError::DuplicateFound(key.to_string())),
        }
    }

    // --- Networks and their member objects ---

    /// Store an alchemical network, sharing any sub-objects that already
    /// exist in this scope. Idempotent: re-submitting the same network in
    /// the same scope yields the same scoped key and no new nodes.
    pub async fn create_network(
        &self,
        network: &AlchemicalNetwork,
        scope: &Scope,
    ) -> Result<ScopedKey, StateError> {
        let sk = self
            .upsert_object(&GufeObject::Network(network.clone()), scope)
            .await?;
        info!("created alchemical network {sk}");
        Ok(sk)
    }

    /// Delete a network and its taskhub. Member transformations and chemical
    /// systems are left in place: they may belong to other networks.
    pub async fn delete_network(&self, network: &ScopedKey) -> Result<ScopedKey, StateError> {
        if network.class_name() != AlchemicalNetwork::CLASS {
            return Err(StateError::InvalidRequest(format!(
                "not an AlchemicalNetwork key: {network}"
            )));
        }

        match self.delete_taskhub(network).await {
            Ok(_) | Err(StateError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.client
            .graph
            .run(
                query("MATCH (an:AlchemicalNetwork {_scoped_key: $sk}) DETACH DELETE an")
                    .param("sk", network.to_string()),
            )
            .await?;

        info!("deleted alchemical network {network}");
        Ok(network.clone())
    }

    pub async fn query_networks(
        &self,
        name: Option<&str>,
        key: Option<&GufeKey>,
        scope: &Scope,
    ) -> Result<Vec<ScopedKey>, StateError> {
        self.query_keys(AlchemicalNetwork::CLASS, name, key, scope)
            .await
    }

    /// Like `query_networks`, but with each network fully reconstructed.
    pub async fn query_networks_gufe(
        &self,
        name: Option<&str>,
        key: Option<&GufeKey>,
        scope: &Scope,
    ) -> Result<Vec<(ScopedKey, AlchemicalNetwork)>, StateError> {
        let keys = self.query_networks(name, key, scope).await?;
        let mut networks = Vec::with_capacity(keys.len());
        for sk in keys {
            let network = self.get_gufe(&sk).await?.try_into()?;
            networks.push((sk, network));
        }
        Ok(networks)
    }

    pub async fn query_transformations(
        &self,
        name: Option<&str>,
        key: Option<&GufeKey>,
        scope: &Scope,
    ) -> Result<Vec<ScopedKey>, StateError> {
        self.query_keys(Transformation::CLASS, name, key, scope)
            .await
    }

    pub async fn query_chemicalsystems(
        &self,
        name: Option<&str>,
        key: Option<&GufeKey>,
        scope: &Scope,
    ) -> Result<Vec<ScopedKey>, StateError> {
        self.query_keys(ChemicalSystem::CLASS, name, key, scope)
            .await
    }
}
