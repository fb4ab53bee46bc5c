//! Object-graph codec: flattens a domain object into node and edge specs
//! that can be merged into the database, and rebuilds objects from fetched
//! subgraphs.
//!
//! Encoding is memoized by scoped key so shared sub-objects are emitted once
//! per call; decoding is memoized by node id so a node reached via multiple
//! paths is rebuilt once.

use std::collections::{BTreeMap, HashMap, HashSet};

use alchemd_common::{Attr, AttrView, GufeKey, GufeObject, Scope, ScopedKey, StateError};
use neo4rs::{query, Node, Query, Relation};
use serde_json::Value;

/// A scalar or primitive-list node property, ready to bind as a parameter.
#[derive(Debug, Clone)]
pub(crate) enum PropValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    StringList(Vec<String>),
}

impl PropValue {
    fn bind(&self, q: Query, name: &str) -> Query {
        match self {
            PropValue::Int(v) => q.param(name, *v),
            PropValue::Float(v) => q.param(name, *v),
            PropValue::Bool(v) => q.param(name, *v),
            PropValue::String(v) => q.param(name, v.as_str()),
            PropValue::IntList(v) => q.param(name, v.clone()),
            PropValue::FloatList(v) => q.param(name, v.clone()),
            PropValue::StringList(v) => q.param(name, v.clone()),
        }
    }
}

/// One node of an encoded subgraph.
#[derive(Debug)]
pub(crate) struct NodeSpec {
    pub scoped_key: String,
    pub gufe_key: String,
    pub class_name: &'static str,
    pub props: Vec<(String, PropValue)>,
    pub json_props: Vec<String>,
}

/// One `DEPENDS_ON` edge of an encoded subgraph.
#[derive(Debug)]
pub(crate) struct EdgeSpec {
    pub from: String,
    pub to: String,
    pub attribute: String,
    pub key: Option<String>,
    pub index: Option<i64>,
}

#[derive(Debug)]
pub(crate) struct EncodedSubgraph {
    pub root: String,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
}

/// Flatten an object (and everything it depends on) into mergeable specs.
/// The scope must be concrete.
pub(crate) fn encode(obj: &GufeObject, scope: &Scope) -> Result<EncodedSubgraph, StateError> {
    let mut out = EncodedSubgraph {
        root: String::new(),
        nodes: Vec::new(),
        edges: Vec::new(),
    };
    let mut memo = HashSet::new();
    out.root = encode_into(obj, scope, &mut memo, &mut out)?;
    Ok(out)
}

fn encode_into(
    obj: &GufeObject,
    scope: &Scope,
    memo: &mut HashSet<String>,
    out: &mut EncodedSubgraph,
) -> Result<String, StateError> {
    let gufe_key = obj.gufe_key();
    let scoped_key = ScopedKey::new(gufe_key.clone(), scope)?.to_string();
    if !memo.insert(scoped_key.clone()) {
        return Ok(scoped_key);
    }

    let mut props = Vec::new();
    let mut json_props = Vec::new();

    for (name, attr) in obj.to_shallow() {
        match attr {
            Attr::Int(v) => props.push((name, PropValue::Int(v))),
            Attr::Float(v) => props.push((name, PropValue::Float(v))),
            Attr::Bool(v) => props.push((name, PropValue::Bool(v))),
            Attr::String(v) => props.push((name, PropValue::String(v))),
            Attr::IntList(v) => props.push((name, PropValue::IntList(v))),
            Attr::FloatList(v) => props.push((name, PropValue::FloatList(v))),
            Attr::StringList(v) => props.push((name, PropValue::StringList(v))),
            Attr::Json(v) => {
                props.push((name.clone(), PropValue::String(serde_json::to_string(&v)?)));
                json_props.push(name);
            }
            Attr::Object(child) => {
                let target = encode_into(&child, scope, memo, out)?;
                out.edges.push(EdgeSpec {
                    from: scoped_key.clone(),
                    to: target,
                    attribute: name,
                    key: None,
                    index: None,
                });
            }
            Attr::ObjectMap(map) => {
                for (key, child) in map {
                    let target = encode_into(&child, scope, memo, out)?;
                    out.edges.push(EdgeSpec {
                        from: scoped_key.clone(),
                        to: target,
                        attribute: name.clone(),
                        key: Some(key),
                        index: None,
                    });
                }
            }
            Attr::ObjectList(list) => {
                for (index, child) in list.into_iter().enumerate() {
                    let target = encode_into(&child, scope, memo, out)?;
                    out.edges.push(EdgeSpec {
                        from: scoped_key.clone(),
                        to: target,
                        attribute: name.clone(),
                        key: None,
                        index: Some(index as i64),
                    });
                }
            }
        }
    }

    out.nodes.push(NodeSpec {
        scoped_key: scoped_key.clone(),
        gufe_key: gufe_key.to_string(),
        class_name: obj.class_name(),
        props,
        json_props,
    });

    Ok(scoped_key)
}

/// Content-addressed upsert of one node. Attribute names are struct fields,
/// so interpolating them into the query text is safe; values always ride as
/// parameters.
pub(crate) fn node_merge_query(
    spec: &NodeSpec,
    org: &str,
    campaign: &str,
    project: &str,
) -> Query {
    let mut set_clauses = vec![
        format!("n:{}", spec.class_name),
        "n._gufe_key = $gufe_key".to_string(),
        "n._org = $org".to_string(),
        "n._campaign = $campaign".to_string(),
        "n._project = $project".to_string(),
        "n._json_props = $json_props".to_string(),
    ];
    for (name, _) in &spec.props {
        set_clauses.push(format!("n.{name} = $p_{name}"));
    }

    let cypher = format!(
        "MERGE (n:GufeTokenizable {{_scoped_key: $scoped_key}})\nSET {}",
        set_clauses.join(",\n    ")
    );

    let mut q = query(&cypher)
        .param("scoped_key", spec.scoped_key.as_str())
        .param("gufe_key", spec.gufe_key.as_str())
        .param("org", org)
        .param("campaign", campaign)
        .param("project", project)
        .param("json_props", spec.json_props.clone());
    for (name, value) in &spec.props {
        q = value.bind(q, &format!("p_{name}"));
    }
    q
}

pub(crate) fn edge_merge_query(
    spec: &EdgeSpec,
    org: &str,
    campaign: &str,
    project: &str,
) -> Query {
    let mut pattern = String::from("attribute: $attribute");
    if spec.key.is_some() {
        pattern.push_str(", key: $key");
    }
    if spec.index.is_some() {
        pattern.push_str(", index: $index");
    }

    let cypher = format!(
        "MATCH (a:GufeTokenizable {{_scoped_key: $from}}), (b:GufeTokenizable {{_scoped_key: $to}})
         MERGE (a)-[r:DEPENDS_ON {{{pattern}}}]->(b)
         SET r._org = $org, r._campaign = $campaign, r._project = $project"
    );

    let mut q = query(&cypher)
        .param("from", spec.from.as_str())
        .param("to", spec.to.as_str())
        .param("attribute", spec.attribute.as_str())
        .param("org", org)
        .param("campaign", campaign)
        .param("project", project);
    if let Some(key) = &spec.key {
        q = q.param("key", key.as_str());
    }
    if let Some(index) = spec.index {
        q = q.param("index", index);
    }
    q
}

// --- Decoding ---

struct RawNode {
    class: String,
    node: Node,
}

#[derive(PartialEq, Eq, Hash)]
struct RawEdge {
    from: i64,
    to: i64,
    attribute: String,
    key: Option<String>,
    index: Option<i64>,
}

/// Accumulates the nodes and `DEPENDS_ON` edges of a fetched subgraph, then
/// rebuilds domain objects from it.
pub(crate) struct SubgraphBuf {
    nodes: HashMap<i64, RawNode>,
    edges: HashSet<RawEdge>,
}

impl SubgraphBuf {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashSet::new(),
        }
    }

    /// Record a node, returning its id. Repeated rows for the same node are
    /// collapsed.
    pub fn absorb_node(&mut self, node: Node) -> Result<i64, StateError> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Ok(id);
        }
        let labels: Vec<String> = node.labels().iter().map(|l| l.to_string()).collect();
        let class = labels
            .into_iter()
            .find(|l| l != "GufeTokenizable")
            .ok_or_else(|| StateError::Codec("stored node has no class label".to_string()))?;
        self.nodes.insert(id, RawNode { class, node });
        Ok(id)
    }

    pub fn absorb_edge(&mut self, rel: &Relation) -> Result<(), StateError> {
        let attribute: String = rel.get("attribute")?;
        let key = rel.get::<Option<String>>("key").ok().flatten();
        let index = rel.get::<Option<i64>>("index").ok().flatten();
        self.edges.insert(RawEdge {
            from: rel.start_node_id(),
            to: rel.end_node_id(),
            attribute,
            key,
            index,
        });
        Ok(())
    }

    pub fn decode(&self, root: i64) -> Result<GufeObject, StateError> {
        let mut memo = HashMap::new();
        self.decode_node(root, &mut memo)
    }

    fn decode_node(
        &self,
        id: i64,
        memo: &mut HashMap<i64, GufeObject>,
    ) -> Result<GufeObject, StateError> {
        if let Some(obj) = memo.get(&id) {
            return Ok(obj.clone());
        }

        let raw = self.nodes.get(&id).ok_or_else(|| {
            StateError::Codec("dependency edge points outside the fetched subgraph".to_string())
        })?;

        let mut deps: BTreeMap<String, DepSlot> = BTreeMap::new();
        for edge in self.edges.iter().filter(|e| e.from == id) {
            let child = self.decode_node(edge.to, memo)?;
            let mixed = || {
                StateError::Codec(format!(
                    "mixed dependency kinds under attribute {}",
                    edge.attribute
                ))
            };
            match (&edge.key, edge.index) {
                (Some(key), None) => {
                    let slot = deps
                        .entry(edge.attribute.clone())
                        .or_insert_with(|| DepSlot::Keyed(BTreeMap::new()));
                    let DepSlot::Keyed(map) = slot else {
                        return Err(mixed());
                    };
                    map.insert(key.clone(), child);
                }
                (None, Some(index)) => {
                    let slot = deps
                        .entry(edge.attribute.clone())
                        .or_insert_with(|| DepSlot::Indexed(Vec::new()));
                    let DepSlot::Indexed(items) = slot else {
                        return Err(mixed());
                    };
                    items.push((index, child));
                }
                (None, None) => {
                    if deps
                        .insert(edge.attribute.clone(), DepSlot::One(child))
                        .is_some()
                    {
                        return Err(mixed());
                    }
                }
                (Some(_), Some(_)) => {
                    return Err(StateError::Codec(format!(
                        "dependency edge for {} carries both key and index",
                        edge.attribute
                    )));
                }
            }
        }

        let gufe_key: String = raw.node.get("_gufe_key")?;
        let token = gufe_key.parse::<GufeKey>()?.token().to_string();
        let json_props: Vec<String> = raw.node.get("_json_props")?;

        let view = NodeView {
            node: &raw.node,
            token,
            json_props,
            deps,
        };
        let obj = GufeObject::from_view(&raw.class, &view)?;
        memo.insert(id, obj.clone());
        Ok(obj)
    }
}

enum DepSlot {
    One(GufeObject),
    Keyed(BTreeMap<String, GufeObject>),
    Indexed(Vec<(i64, GufeObject)>),
}

/// Attribute view over a stored node plus its resolved dependencies.
struct NodeView<'a> {
    node: &'a Node,
    token: String,
    json_props: Vec<String>,
    deps: BTreeMap<String, DepSlot>,
}

impl AttrView for NodeView<'_> {
    fn token(&self) -> &str {
        &self.token
    }

    fn string(&self, key: &str) -> Result<String, StateError> {
        Ok(self.node.get(key)?)
    }

    fn opt_string(&self, key: &str) -> Result<Option<String>, StateError> {
        Ok(self.node.get::<Option<String>>(key).ok().flatten())
    }

    fn int(&self, key: &str) -> Result<i64, StateError> {
        Ok(self.node.get(key)?)
    }

    fn float(&self, key: &str) -> Result<f64, StateError> {
        Ok(self.node.get(key)?)
    }

    fn float_list(&self, key: &str) -> Result<Vec<f64>, StateError> {
        Ok(self.node.get(key)?)
    }

    fn json(&self, key: &str) -> Result<Value, StateError> {
        if !self.json_props.iter().any(|p| p == key) {
            return Err(StateError::Codec(format!(
                "attribute {key} is not recorded in _json_props"
            )));
        }
        let raw: String = self.node.get(key)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn object(&self, key: &str) -> Result<GufeObject, StateError> {
        match self.deps.get(key) {
            Some(DepSlot::One(obj)) => Ok(obj.clone()),
            Some(_) => Err(StateError::Codec(format!(
                "attribute {key} is not a single dependency"
            ))),
            None => Err(StateError::Codec(format!(
                "required dependency {key} is missing from the stored subgraph"
            ))),
        }
    }

    fn object_map(&self, key: &str) -> Result<BTreeMap<String, GufeObject>, StateError> {
        match self.deps.get(key) {
            None => Ok(BTreeMap::new()),
            Some(DepSlot::Keyed(map)) => Ok(map.clone()),
            Some(_) => Err(StateError::Codec(format!(
                "attribute {key} is not a keyed dependency map"
            ))),
        }
    }

    fn object_list(&self, key: &str) -> Result<Vec<GufeObject>, StateError> {
        match self.deps.get(key) {
            None => Ok(Vec::new()),
            Some(DepSlot::Indexed(items)) => {
                // traversal order is not guaranteed; the index restores it
                let mut sorted: Vec<(i64, GufeObject)> = items.clone();
                sorted.sort_by_key(|(index, _)| *index);
                Ok(sorted.into_iter().map(|(_, obj)| obj).collect())
            }
            Some(_) => Err(StateError::Codec(format!(
                "attribute {key} is not an indexed dependency list"
            ))),
        }
    }
}
