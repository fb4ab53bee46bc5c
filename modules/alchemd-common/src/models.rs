//! Content-addressed domain objects and their shallow attribute encoding.
//!
//! Every persisted object flattens to a shallow map of [`Attr`] values: the
//! graph codec walks that map to emit nodes, properties and `DEPENDS_ON`
//! edges, and reconstructs objects from an [`AttrView`] over a stored node.
//! The attribute classification is a closed tagged union rather than runtime
//! type inspection, so the codec never has to guess a value's layout.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::StateError;
use crate::scope::GufeKey;
use crate::task::TaskStatus;

/// One attribute of a domain object, as seen by the graph codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    /// Uniform primitive list, stored as a native list property.
    /// An empty list is stored as an empty native list.
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    StringList(Vec<String>),
    /// Heterogeneous or nested non-object value; serialized to canonical
    /// JSON and recorded in the node's `_json_props`.
    Json(Value),
    /// Embedded domain object: one `DEPENDS_ON {attribute}` edge.
    Object(GufeObject),
    /// Mapping of domain objects: one `DEPENDS_ON {attribute, key}` per entry.
    ObjectMap(BTreeMap<String, GufeObject>),
    /// Sequence of domain objects: one `DEPENDS_ON {attribute, index}` per
    /// element.
    ObjectList(Vec<GufeObject>),
}

/// Shallow attribute map of a domain object.
pub type ShallowDict = BTreeMap<String, Attr>;

/// Read access to a decoded node's attributes. Implemented by the graph
/// codec over a stored node plus its resolved `DEPENDS_ON` targets, and by
/// in-memory views in tests.
pub trait AttrView {
    /// Content token of the node being decoded (from its stored gufe key).
    fn token(&self) -> &str;
    fn string(&self, key: &str) -> Result<String, StateError>;
    fn opt_string(&self, key: &str) -> Result<Option<String>, StateError>;
    fn int(&self, key: &str) -> Result<i64, StateError>;
    fn float(&self, key: &str) -> Result<f64, StateError>;
    fn float_list(&self, key: &str) -> Result<Vec<f64>, StateError>;
    fn json(&self, key: &str) -> Result<Value, StateError>;
    fn object(&self, key: &str) -> Result<GufeObject, StateError>;
    fn object_map(&self, key: &str) -> Result<BTreeMap<String, GufeObject>, StateError>;
    fn object_list(&self, key: &str) -> Result<Vec<GufeObject>, StateError>;
}

/// A domain object that can be flattened to a shallow dict and rebuilt from
/// one. The content token is derived from the shallow dict, with nested
/// objects contributing their gufe keys, so equal content always hashes to
/// the same key regardless of in-memory identity.
pub trait Tokenizable: Sized {
    const CLASS: &'static str;

    fn to_shallow(&self) -> ShallowDict;

    fn from_view(view: &dyn AttrView) -> Result<Self, StateError>;

    fn token(&self) -> String {
        content_token(Self::CLASS, &self.to_shallow())
    }

    fn gufe_key(&self) -> GufeKey {
        GufeKey::new(Self::CLASS, self.token())
    }
}

/// Canonical JSON form of an attribute for hashing: nested objects are
/// replaced by their gufe key strings.
fn canonical_value(attr: &Attr) -> Value {
    match attr {
        Attr::Int(v) => Value::from(*v),
        Attr::Float(v) => Value::from(*v),
        Attr::Bool(v) => Value::from(*v),
        Attr::String(v) => Value::from(v.clone()),
        Attr::IntList(v) => Value::from(v.clone()),
        Attr::FloatList(v) => Value::from(v.clone()),
        Attr::StringList(v) => Value::from(v.clone()),
        Attr::Json(v) => v.clone(),
        Attr::Object(o) => Value::from(o.gufe_key().to_string()),
        Attr::ObjectMap(m) => Value::Object(
            m.iter()
                .map(|(k, o)| (k.clone(), Value::from(o.gufe_key().to_string())))
                .collect(),
        ),
        Attr::ObjectList(l) => Value::Array(
            l.iter()
                .map(|o| Value::from(o.gufe_key().to_string()))
                .collect(),
        ),
    }
}

/// Content token: first 32 hex chars of SHA-256 over the class name and the
/// canonical shallow JSON. `BTreeMap` iteration gives a stable field order.
pub fn content_token(class_name: &str, shallow: &ShallowDict) -> String {
    let doc: BTreeMap<&str, Value> = shallow
        .iter()
        .map(|(k, v)| (k.as_str(), canonical_value(v)))
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(class_name.as_bytes());
    hasher.update(b":");
    hasher.update(serde_json::to_string(&doc).expect("canonical JSON is serializable"));
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

// --- Scientific model ---

/// Leaf chemical entity of a system, keyed by role within it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChemicalComponent {
    pub name: String,
    pub smiles: String,
    pub charge: i64,
}

impl Tokenizable for ChemicalComponent {
    const CLASS: &'static str = "ChemicalComponent";

    fn to_shallow(&self) -> ShallowDict {
        ShallowDict::from([
            ("name".to_string(), Attr::String(self.name.clone())),
            ("smiles".to_string(), Attr::String(self.smiles.clone())),
            ("charge".to_string(), Attr::Int(self.charge)),
        ])
    }

    fn from_view(view: &dyn AttrView) -> Result<Self, StateError> {
        Ok(Self {
            name: view.string("name")?,
            smiles: view.string("smiles")?,
            charge: view.int("charge")?,
        })
    }
}

/// One node of a workflow: a full chemical state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChemicalSystem {
    pub name: String,
    pub components: BTreeMap<String, ChemicalComponent>,
    pub box_vectors: Vec<f64>,
}

impl Tokenizable for ChemicalSystem {
    const CLASS: &'static str = "ChemicalSystem";

    fn to_shallow(&self) -> ShallowDict {
        let components = self
            .components
            .iter()
            .map(|(k, c)| (k.clone(), GufeObject::Component(c.clone())))
            .collect();
        ShallowDict::from([
            ("name".to_string(), Attr::String(self.name.clone())),
            ("components".to_string(), Attr::ObjectMap(components)),
            (
                "box_vectors".to_string(),
                Attr::FloatList(self.box_vectors.clone()),
            ),
        ])
    }

    fn from_view(view: &dyn AttrView) -> Result<Self, StateError> {
        let components = view
            .object_map("components")?
            .into_iter()
            .map(|(k, o)| ChemicalComponent::try_from(o).map(|c| (k, c)))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            name: view.string("name")?,
            components,
            box_vectors: view.float_list("box_vectors")?,
        })
    }
}

/// One edge of a workflow: a single scientific transition between two
/// chemical states.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    pub name: String,
    pub state_a: ChemicalSystem,
    pub state_b: ChemicalSystem,
    /// Atom mapping between the end states; free-form nested structure.
    pub mapping: Value,
    /// Protocol settings; free-form nested structure.
    pub settings: Value,
}

impl Tokenizable for Transformation {
    const CLASS: &'static str = "Transformation";

    fn to_shallow(&self) -> ShallowDict {
        ShallowDict::from([
            ("name".to_string(), Attr::String(self.name.clone())),
            (
                "state_a".to_string(),
                Attr::Object(GufeObject::ChemicalSystem(self.state_a.clone())),
            ),
            (
                "state_b".to_string(),
                Attr::Object(GufeObject::ChemicalSystem(self.state_b.clone())),
            ),
            ("mapping".to_string(), Attr::Json(self.mapping.clone())),
            ("settings".to_string(), Attr::Json(self.settings.clone())),
        ])
    }

    fn from_view(view: &dyn AttrView) -> Result<Self, StateError> {
        Ok(Self {
            name: view.string("name")?,
            state_a: view.object("state_a")?.try_into()?,
            state_b: view.object("state_b")?.try_into()?,
            mapping: view.json("mapping")?,
            settings: view.json("settings")?,
        })
    }
}

/// A user-submitted workflow: a set of transformations over a set of
/// chemical systems.
#[derive(Debug, Clone, PartialEq)]
pub struct AlchemicalNetwork {
    pub name: String,
    pub edges: Vec<Transformation>,
    pub nodes: Vec<ChemicalSystem>,
}

impl Tokenizable for AlchemicalNetwork {
    const CLASS: &'static str = "AlchemicalNetwork";

    fn to_shallow(&self) -> ShallowDict {
        ShallowDict::from([
            ("name".to_string(), Attr::String(self.name.clone())),
            (
                "edges".to_string(),
                Attr::ObjectList(
                    self.edges
                        .iter()
                        .cloned()
                        .map(GufeObject::Transformation)
                        .collect(),
                ),
            ),
            (
                "nodes".to_string(),
                Attr::ObjectList(
                    self.nodes
                        .iter()
                        .cloned()
                        .map(GufeObject::ChemicalSystem)
                        .collect(),
                ),
            ),
        ])
    }

    fn from_view(view: &dyn AttrView) -> Result<Self, StateError> {
        let edges = view
            .object_list("edges")?
            .into_iter()
            .map(Transformation::try_from)
            .collect::<Result<_, _>>()?;
        let nodes = view
            .object_list("nodes")?
            .into_iter()
            .map(ChemicalSystem::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            name: view.string("name")?,
            edges,
            nodes,
        })
    }
}

/// Opaque locator into the external object store; the persisted result
/// descriptor of a completed task. Bulk payloads never enter this store.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStoreRef {
    pub location: String,
}

impl Tokenizable for ObjectStoreRef {
    const CLASS: &'static str = "ObjectStoreRef";

    fn to_shallow(&self) -> ShallowDict {
        ShallowDict::from([(
            "location".to_string(),
            Attr::String(self.location.clone()),
        )])
    }

    fn from_view(view: &dyn AttrView) -> Result<Self, StateError> {
        Ok(Self {
            location: view.string("location")?,
        })
    }
}

/// One unit of work against a transformation. Unlike the scientific objects,
/// a task is identified by a fresh uuid token rather than its content: two
/// tasks with identical fields are still distinct work items.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    token: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub claim: Option<String>,
}

pub const TASK_DEFAULT_PRIORITY: i64 = 10;

impl Task {
    pub fn new() -> Self {
        Self {
            // simple format: `-` would collide with the scoped-key separator
            token: uuid::Uuid::new_v4().simple().to_string(),
            status: TaskStatus::Waiting,
            priority: TASK_DEFAULT_PRIORITY,
            claim: None,
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizable for Task {
    const CLASS: &'static str = "Task";

    fn to_shallow(&self) -> ShallowDict {
        let mut dict = ShallowDict::from([
            (
                "status".to_string(),
                Attr::String(self.status.to_string()),
            ),
            ("priority".to_string(), Attr::Int(self.priority)),
        ]);
        if let Some(claim) = &self.claim {
            dict.insert("claim".to_string(), Attr::String(claim.clone()));
        }
        dict
    }

    fn from_view(view: &dyn AttrView) -> Result<Self, StateError> {
        let status = view.string("status")?;
        Ok(Self {
            token: view.token().to_string(),
            status: status
                .parse()
                .map_err(|e: String| StateError::Codec(e))?,
            priority: view.int("priority")?,
            claim: view.opt_string("claim")?,
        })
    }

    fn token(&self) -> String {
        self.token.clone()
    }
}

/// The dispatch queue of one alchemical network. Its token hashes only the
/// network key: `weight` is mutable and must not move the node's identity,
/// and concurrent creators must compute the same scoped key.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskHub {
    pub network: String,
    pub weight: f64,
}

pub const TASKHUB_DEFAULT_WEIGHT: f64 = 0.5;

impl TaskHub {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            weight: TASKHUB_DEFAULT_WEIGHT,
        }
    }
}

impl Tokenizable for TaskHub {
    const CLASS: &'static str = "TaskHub";

    fn to_shallow(&self) -> ShallowDict {
        ShallowDict::from([
            ("network".to_string(), Attr::String(self.network.clone())),
            ("weight".to_string(), Attr::Float(self.weight)),
        ])
    }

    fn from_view(view: &dyn AttrView) -> Result<Self, StateError> {
        Ok(Self {
            network: view.string("network")?,
            weight: view.float("weight")?,
        })
    }

    fn token(&self) -> String {
        let identity = ShallowDict::from([(
            "network".to_string(),
            Attr::String(self.network.clone()),
        )]);
        content_token(Self::CLASS, &identity)
    }
}

// --- Closed dispatch over all persistable classes ---

/// Any persistable domain object. Class-name dispatch for decoding happens
/// here instead of via a runtime type registry.
#[derive(Debug, Clone, PartialEq)]
pub enum GufeObject {
    Network(AlchemicalNetwork),
    Transformation(Transformation),
    ChemicalSystem(ChemicalSystem),
    Component(ChemicalComponent),
    ObjectStoreRef(ObjectStoreRef),
    Task(Task),
    TaskHub(TaskHub),
}

impl GufeObject {
    pub fn class_name(&self) -> &'static str {
        match self {
            GufeObject::Network(_) => AlchemicalNetwork::CLASS,
            GufeObject::Transformation(_) => Transformation::CLASS,
            GufeObject::ChemicalSystem(_) => ChemicalSystem::CLASS,
            GufeObject::Component(_) => ChemicalComponent::CLASS,
            GufeObject::ObjectStoreRef(_) => ObjectStoreRef::CLASS,
            GufeObject::Task(_) => Task::CLASS,
            GufeObject::TaskHub(_) => TaskHub::CLASS,
        }
    }

    pub fn to_shallow(&self) -> ShallowDict {
        match self {
            GufeObject::Network(o) => o.to_shallow(),
            GufeObject::Transformation(o) => o.to_shallow(),
            GufeObject::ChemicalSystem(o) => o.to_shallow(),
            GufeObject::Component(o) => o.to_shallow(),
            GufeObject::ObjectStoreRef(o) => o.to_shallow(),
            GufeObject::Task(o) => o.to_shallow(),
            GufeObject::TaskHub(o) => o.to_shallow(),
        }
    }

    pub fn gufe_key(&self) -> GufeKey {
        match self {
            GufeObject::Network(o) => o.gufe_key(),
            GufeObject::Transformation(o) => o.gufe_key(),
            GufeObject::ChemicalSystem(o) => o.gufe_key(),
            GufeObject::Component(o) => o.gufe_key(),
            GufeObject::ObjectStoreRef(o) => o.gufe_key(),
            GufeObject::Task(o) => o.gufe_key(),
            GufeObject::TaskHub(o) => o.gufe_key(),
        }
    }

    /// Rebuild an object of the given class from a decoded attribute view.
    pub fn from_view(class_name: &str, view: &dyn AttrView) -> Result<Self, StateError> {
        match class_name {
            AlchemicalNetwork::CLASS => AlchemicalNetwork::from_view(view).map(Self::Network),
            Transformation::CLASS => Transformation::from_view(view).map(Self::Transformation),
            ChemicalSystem::CLASS => ChemicalSystem::from_view(view).map(Self::ChemicalSystem),
            ChemicalComponent::CLASS => ChemicalComponent::from_view(view).map(Self::Component),
            ObjectStoreRef::CLASS => ObjectStoreRef::from_view(view).map(Self::ObjectStoreRef),
            Task::CLASS => Task::from_view(view).map(Self::Task),
            TaskHub::CLASS => TaskHub::from_view(view).map(Self::TaskHub),
            other => Err(StateError::Codec(format!(
                "unknown domain class label: {other}"
            ))),
        }
    }
}

macro_rules! gufe_object_conversions {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for GufeObject {
                fn from(value: $ty) -> Self {
                    GufeObject::$variant(value)
                }
            }

            impl TryFrom<GufeObject> for $ty {
                type Error = StateError;

                fn try_from(value: GufeObject) -> Result<Self, Self::Error> {
                    match value {
                        GufeObject::$variant(inner) => Ok(inner),
                        other => Err(StateError::Codec(format!(
                            concat!("expected ", stringify!($ty), ", found {}"),
                            other.class_name()
                        ))),
                    }
                }
            }
        )+
    };
}

gufe_object_conversions! {
    Network => AlchemicalNetwork,
    Transformation => Transformation,
    ChemicalSystem => ChemicalSystem,
    Component => ChemicalComponent,
    ObjectStoreRef => ObjectStoreRef,
    Task => Task,
    TaskHub => TaskHub,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// In-memory attribute view over a shallow dict, standing in for a
    /// stored node.
    struct MapView {
        token: String,
        dict: ShallowDict,
    }

    impl MapView {
        fn of(obj: &GufeObject) -> Self {
            Self {
                token: obj.gufe_key().token().to_string(),
                dict: obj.to_shallow(),
            }
        }

        fn attr(&self, key: &str) -> Result<&Attr, StateError> {
            self.dict
                .get(key)
                .ok_or_else(|| StateError::Codec(format!("missing attribute {key}")))
        }
    }

    impl AttrView for MapView {
        fn token(&self) -> &str {
            &self.token
        }

        fn string(&self, key: &str) -> Result<String, StateError> {
            match self.attr(key)? {
                Attr::String(s) => Ok(s.clone()),
                other => Err(StateError::Codec(format!("{key}: not a string: {other:?}"))),
            }
        }

        fn opt_string(&self, key: &str) -> Result<Option<String>, StateError> {
            match self.dict.get(key) {
                None => Ok(None),
                Some(Attr::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(StateError::Codec(format!("{key}: not a string: {other:?}"))),
            }
        }

        fn int(&self, key: &str) -> Result<i64, StateError> {
            match self.attr(key)? {
                Attr::Int(v) => Ok(*v),
                other => Err(StateError::Codec(format!("{key}: not an int: {other:?}"))),
            }
        }

        fn float(&self, key: &str) -> Result<f64, StateError> {
            match self.attr(key)? {
                Attr::Float(v) => Ok(*v),
                other => Err(StateError::Codec(format!("{key}: not a float: {other:?}"))),
            }
        }

        fn float_list(&self, key: &str) -> Result<Vec<f64>, StateError> {
            match self.attr(key)? {
                Attr::FloatList(v) => Ok(v.clone()),
                other => Err(StateError::Codec(format!(
                    "{key}: not a float list: {other:?}"
                ))),
            }
        }

        fn json(&self, key: &str) -> Result<Value, StateError> {
            match self.attr(key)? {
                Attr::Json(v) => Ok(v.clone()),
                other => Err(StateError::Codec(format!("{key}: not json: {other:?}"))),
            }
        }

        fn object(&self, key: &str) -> Result<GufeObject, StateError> {
            match self.attr(key)? {
                Attr::Object(o) => Ok(o.clone()),
                other => Err(StateError::Codec(format!("{key}: not an object: {other:?}"))),
            }
        }

        fn object_map(&self, key: &str) -> Result<BTreeMap<String, GufeObject>, StateError> {
            match self.dict.get(key) {
                None => Ok(BTreeMap::new()),
                Some(Attr::ObjectMap(m)) => Ok(m.clone()),
                Some(other) => Err(StateError::Codec(format!(
                    "{key}: not an object map: {other:?}"
                ))),
            }
        }

        fn object_list(&self, key: &str) -> Result<Vec<GufeObject>, StateError> {
            match self.dict.get(key) {
                None => Ok(Vec::new()),
                Some(Attr::ObjectList(l)) => Ok(l.clone()),
                Some(other) => Err(StateError::Codec(format!(
                    "{key}: not an object list: {other:?}"
                ))),
            }
        }
    }

    fn ligand(name: &str) -> ChemicalSystem {
        ChemicalSystem {
            name: name.to_string(),
            components: BTreeMap::from([
                (
                    "ligand".to_string(),
                    ChemicalComponent {
                        name: name.to_string(),
                        smiles: "c1ccccc1".to_string(),
                        charge: 0,
                    },
                ),
                (
                    "solvent".to_string(),
                    ChemicalComponent {
                        name: "water".to_string(),
                        smiles: "O".to_string(),
                        charge: 0,
                    },
                ),
            ]),
            box_vectors: vec![3.0, 3.0, 3.0],
        }
    }

    fn edge(name: &str, a: &ChemicalSystem, b: &ChemicalSystem) -> Transformation {
        Transformation {
            name: name.to_string(),
            state_a: a.clone(),
            state_b: b.clone(),
            mapping: json!({"atoms": [[0, 0], [1, 2]]}),
            settings: json!({"lambda_windows": 11, "sampler": "repex"}),
        }
    }

    #[test]
    fn shallow_round_trip_network() {
        let a = ligand("l1");
        let b = ligand("l2");
        let network = AlchemicalNetwork {
            name: "net".to_string(),
            edges: vec![edge("l1_to_l2", &a, &b)],
            nodes: vec![a, b],
        };
        let obj = GufeObject::Network(network.clone());
        let rebuilt = AlchemicalNetwork::from_view(&MapView::of(&obj)).unwrap();
        assert_eq!(rebuilt, network);
        assert_eq!(rebuilt.gufe_key(), network.gufe_key());
    }

    #[test]
    fn token_is_content_addressed() {
        let a = ligand("l1");
        let b = ligand("l1");
        assert_eq!(a.gufe_key(), b.gufe_key());

        let mut c = ligand("l1");
        c.box_vectors = vec![4.0, 4.0, 4.0];
        assert_ne!(a.gufe_key(), c.gufe_key());
    }

    #[test]
    fn network_token_depends_on_membership() {
        let a = ligand("l1");
        let b = ligand("l2");
        let c = ligand("l3");
        let full = AlchemicalNetwork {
            name: "net".to_string(),
            edges: vec![edge("e1", &a, &b), edge("e2", &b, &c)],
            nodes: vec![a.clone(), b.clone(), c.clone()],
        };
        let mut smaller = full.clone();
        smaller.edges.pop();
        assert_ne!(full.gufe_key(), smaller.gufe_key());
    }

    #[test]
    fn task_tokens_are_unique() {
        let t1 = Task::new();
        let t2 = Task::new();
        assert_ne!(t1.gufe_key(), t2.gufe_key());
        assert_eq!(t1.status, TaskStatus::Waiting);
        assert_eq!(t1.priority, TASK_DEFAULT_PRIORITY);
        assert!(t1.claim.is_none());
        assert!(!t1.token().contains('-'));
    }

    #[test]
    fn taskhub_token_ignores_weight() {
        let mut hub = TaskHub::new("AlchemicalNetwork-abc-org-camp-proj");
        let key = hub.gufe_key();
        hub.weight = 0.9;
        assert_eq!(hub.gufe_key(), key);

        let other = TaskHub::new("AlchemicalNetwork-def-org-camp-proj");
        assert_ne!(other.gufe_key(), key);
    }

    #[test]
    fn task_round_trip_preserves_claim() {
        let mut task = Task::new();
        task.status = TaskStatus::Running;
        task.claim = Some("worker-7".to_string());
        let obj = GufeObject::Task(task.clone());
        let rebuilt = Task::from_view(&MapView::of(&obj)).unwrap();
        assert_eq!(rebuilt, task);
    }

    #[test]
    fn empty_collections_round_trip() {
        let system = ChemicalSystem {
            name: "vacuum".to_string(),
            components: BTreeMap::new(),
            box_vectors: vec![],
        };
        let obj = GufeObject::ChemicalSystem(system.clone());
        let rebuilt = ChemicalSystem::from_view(&MapView::of(&obj)).unwrap();
        assert_eq!(rebuilt, system);
    }

    #[test]
    fn conversion_rejects_wrong_class() {
        let obj = GufeObject::ObjectStoreRef(ObjectStoreRef {
            location: "results/abc".to_string(),
        });
        assert!(Transformation::try_from(obj).is_err());
    }
}
