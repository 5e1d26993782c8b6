//! Reverse lookup from dependent objects to the IngressController owning
//! them, used to turn watch events on dependents into reconcile requests.

use std::sync::Arc;

use kube::Resource;
use kube::runtime::reflector::ObjectRef;
use tracing::trace;

use crate::crd::IngressController;
use crate::store::ObjectKey;
use crate::templates::OWNING_INGRESS_CONTROLLER_LABEL;

/// (kind, namespace/name) of a dependent
type DependentKey = (String, ObjectKey);

/// Dependent identity to owner identity, rebuilt from the owner label every
/// time a dependent is observed. Remembers the last owner so an object that
/// lost its label still reaches the controller that created it.
///
/// Entries are dropped when a dependent loses its label or starts
/// terminating. Dependent names derive from the owner name, so the index
/// holds at most one entry per dependent kind and IngressController name.
#[derive(Clone)]
pub struct OwnerIndex {
    namespace: String,
    owners: Arc<scc::HashMap<DependentKey, String>>,
}

impl OwnerIndex {
    /// `namespace` is where IngressControllers live.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            owners: Arc::new(scc::HashMap::new()),
        }
    }

    /// Owning IngressController of `obj`, updating the index on the way.
    pub fn observe<K>(&self, obj: &K) -> Option<ObjectKey>
    where
        K: Resource<DynamicType = ()>,
    {
        let meta = obj.meta();
        let dependent = (
            K::kind(&()).to_string(),
            ObjectKey {
                namespace: meta.namespace.clone(),
                name: meta.name.clone().unwrap_or_default(),
            },
        );
        let labelled = meta
            .labels
            .as_ref()
            .and_then(|l| l.get(OWNING_INGRESS_CONTROLLER_LABEL))
            .filter(|v| !v.is_empty())
            .cloned();
        let owner = match labelled {
            Some(owner) if meta.deletion_timestamp.is_none() => {
                self.owners
                    .entry(dependent.clone())
                    .insert_entry(owner.clone());
                Some(owner)
            }
            Some(owner) => {
                self.owners.remove(&dependent);
                Some(owner)
            }
            None => self.owners.remove(&dependent).map(|(_, owner)| owner),
        }?;
        trace!(kind = %dependent.0, dependent = %dependent.1, %owner, "mapped dependent to owner");
        Some(ObjectKey::namespaced(&self.namespace, &owner))
    }

    /// Reconcile requests for a watch event on a dependent.
    pub fn requests_for<K>(&self, obj: &K) -> Option<ObjectRef<IngressController>>
    where
        K: Resource<DynamicType = ()>,
    {
        self.observe(obj).map(|key| {
            ObjectRef::new(&key.name).within(&self.namespace)
        })
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
