//! Credentialed entity store: users and compute identities, their hashed
//! keys, and scope grants. Credential verification happens elsewhere; this
//! store only keeps the material an authenticator needs.

use alchemd_common::{CredentialedEntity, IdentityKind, Scope, StateError};
use neo4rs::query;
use tracing::info;

use crate::store::{run_rows, txn_rows, StateStore};

impl StateStore {
    /// Create or overwrite a credentialed entity, keyed on its identifier
    /// within its kind. Overwriting replaces the stored credential and
    /// scope grants.
    pub async fn create_credentialed_entity(
        &self,
        entity: &CredentialedEntity,
        kind: IdentityKind,
    ) -> Result<(), StateError> {
        let cypher = format!(
            "MERGE (n:{label} {{identifier: $identifier}})
             SET n:CredentialedEntity,
                 n.hashed_key = $hashed_key,
                 n.scopes = $scopes",
            label = kind.label()
        );
        let q = query(&cypher)
            .param("identifier", entity.identifier.as_str())
            .param("hashed_key", entity.hashed_key.as_str())
            .param("scopes", entity.scopes.clone());
        self.client.graph.run(q).await?;
        info!(
            "stored credentialed entity '{}' ({})",
            entity.identifier,
            kind.label()
        );
        Ok(())
    }

    pub async fn get_credentialed_entity(
        &self,
        identifier: &str,
        kind: IdentityKind,
    ) -> Result<CredentialedEntity, StateError> {
        let cypher = format!(
            "MATCH (n:{label} {{identifier: $identifier}})
             RETURN n.identifier AS identifier, n.hashed_key AS hashed_key, n.scopes AS scopes",
            label = kind.label()
        );
        let q = query(&cypher).param("identifier", identifier);

        let mut entities = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            entities.push(CredentialedEntity {
                identifier: row.get("identifier")?,
                hashed_key: row.get("hashed_key")?,
                scopes: row.get("scopes")?,
            });
        }
        match entities.len() {
            0 => Err(StateError::NotFound(identifier.to_string())),
            1 => Ok(entities.remove(0)),
            _ => Err(StateError::DuplicateFound(identifier.to_string())),
        }
    }

    pub async fn list_credentialed_entities(
        &self,
        kind: IdentityKind,
    ) -> Result<Vec<String>, StateError> {
        let cypher = format!(
            "MATCH (n:{label}) RETURN n.identifier AS identifier",
            label = kind.label()
        );
        let mut identifiers = Vec::new();
        let mut stream = self.client.graph.execute(query(&cypher)).await?;
        while let Some(row) = stream.next().await? {
            identifiers.push(row.get("identifier")?);
        }
        Ok(identifiers)
    }

    pub async fn remove_credentialed_identity(
        &self,
        identifier: &str,
        kind: IdentityKind,
    ) -> Result<(), StateError> {
        let cypher = format!(
            "MATCH (n:{label} {{identifier: $identifier}}) DETACH DELETE n",
            label = kind.label()
        );
        self.client
            .graph
            .run(query(&cypher).param("identifier", identifier))
            .await?;
        info!("removed credentialed entity '{identifier}' ({})", kind.label());
        Ok(())
    }

    /// Grant a scope to an entity. Adding a scope the entity already holds
    /// is a no-op.
    pub async fn add_scope(
        &self,
        identifier: &str,
        kind: IdentityKind,
        scope: &Scope,
    ) -> Result<(), StateError> {
        let label = kind.label();
        let mut txn = self.client.graph.start_txn().await?;
        let outcome: Result<(), StateError> = async {
            let exists = query(&format!(
                "MATCH (n:{label} {{identifier: $identifier}}) RETURN n.identifier AS identifier"
            ))
            .param("identifier", identifier);
            if txn_rows(&mut txn, exists).await? == 0 {
                return Err(StateError::NotFound(identifier.to_string()));
            }

            // the absence check and the append are one statement
            let append = query(&format!(
                "MATCH (n:{label} {{identifier: $identifier}})
                 WHERE NONE(x IN n.scopes WHERE x = $scope)
                 SET n.scopes = n.scopes + $scope"
            ))
            .param("identifier", identifier)
            .param("scope", scope.to_string());
            txn.run(append).await?;
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

    /// Revoke a scope from an entity. Removing a scope the entity does not
    /// hold is a no-op.
    pub async fn remove_scope(
        &self,
        identifier: &str,
        kind: IdentityKind,
        scope: &Scope,
    ) -> Result<(), StateError> {
        let cypher = format!(
            "MATCH (n:{label} {{identifier: $identifier}})
             SET n.scopes = [x IN n.scopes WHERE x <> $scope]
             RETURN n.identifier AS identifier",
            label = kind.label()
        );
        let q = query(&cypher)
            .param("identifier", identifier)
            .param("scope", scope.to_string());
        if run_rows(&self.client.graph, q).await? == 0 {
            return Err(StateError::NotFound(identifier.to_string()));
        }
        Ok(())
    }

    /// All scopes granted to an entity, decoded.
    pub async fn list_scopes(
        &self,
        identifier: &str,
        kind: IdentityKind,
    ) -> Result<Vec<Scope>, StateError> {
        let entity = self.get_credentialed_entity(identifier, kind).await?;
        entity
            .scopes
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()
    }

    /// Whether any of the entity's grants covers the given scope.
    pub async fn has_scope(
        &self,
        identifier: &str,
        kind: IdentityKind,
        scope: &Scope,
    ) -> Result<bool, StateError> {
        let grants = self.list_scopes(identifier, kind).await?;
        Ok(grants.iter().any(|grant| grant.contains(scope)))
    }
}
