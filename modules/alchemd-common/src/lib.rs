pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod scope;
pub mod task;

pub use config::Config;
pub use error::StateError;
pub use identity::{CredentialedEntity, IdentityKind};
pub use models::{
    AlchemicalNetwork, Attr, AttrView, ChemicalComponent, ChemicalSystem, GufeObject,
    ObjectStoreRef, ShallowDict, Task, TaskHub, Tokenizable, Transformation,
    TASKHUB_DEFAULT_WEIGHT, TASK_DEFAULT_PRIORITY,
};
pub use scope::{GufeKey, Scope, ScopedKey};
pub use task::TaskStatus;
