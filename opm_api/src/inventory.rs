//! Module `inventory` holds the persisted per-release record: identity,
//! change history, and tracked resources. One Kubernetes Secret per release
//! stores the whole record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::labels::inventory_labels;
use crate::metadata::{ModuleMetadata, ReleaseMetadata};
use crate::resource::Resource;
use crate::{Error, Result};

/// SECRET_TYPE is the Kubernetes Secret type of an inventory record.
pub static SECRET_TYPE: &str = "opmodel.dev/release";

/// HEADER_API_VERSION and [`HEADER_KIND`] name the body schema, so a future
/// promotion to a CRD keeps the same data model.
pub static HEADER_API_VERSION: &str = "opmodel.dev/v1alpha1";

/// HEADER_KIND is the kind header inside the Secret body.
pub static HEADER_KIND: &str = "Inventory";

/// DEFAULT_HISTORY_LIMIT bounds the change-ID index length.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// InventoryEntry is one tracked resource.
///
/// Identity is every field except `version`: API-version drift must not
/// create false orphans.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    /// Group is the API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    /// Kind is the Kubernetes kind.
    pub kind: String,
    /// Namespace is empty for cluster-scoped resources.
    #[serde(default)]
    pub namespace: String,
    /// Name is the object name.
    pub name: String,
    /// Version is the API version within the group; excluded from identity.
    pub version: String,
    /// Component is the originating component name.
    pub component: String,
}

impl InventoryEntry {
    /// Identity reports the identity tuple, excluding the API version.
    pub fn identity(&self) -> (&str, &str, &str, &str, &str) {
        (
            &self.group,
            &self.kind,
            &self.namespace,
            &self.name,
            &self.component,
        )
    }

    /// Kubernetes_identity reports the cluster-side identity, which ignores
    /// the owning component as well.
    pub fn kubernetes_identity(&self) -> (&str, &str, &str, &str) {
        (&self.group, &self.kind, &self.namespace, &self.name)
    }
}

impl From<&Resource> for InventoryEntry {
    fn from(r: &Resource) -> Self {
        InventoryEntry {
            group: r.group().into(),
            kind: r.kind.clone(),
            namespace: r.namespace().into(),
            name: r.name().into(),
            version: r.version().into(),
            component: r.origin.component.clone(),
        }
    }
}

/// ChangeEntry records one apply.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    /// Module is the module reference the release was built from.
    pub module: String,
    /// ModuleVersion is the module version at apply time.
    pub module_version: String,
    /// Values is the resolved values text injected into the module.
    pub values: String,
    /// Digest is the manifest digest of the rendered resource set.
    pub digest: String,
    /// Timestamp is the UTC apply time.
    pub timestamp: DateTime<Utc>,
    /// Entries are the resources tracked by this change.
    pub entries: Vec<InventoryEntry>,
}

impl ChangeEntry {
    /// Id reports the deterministic change ID,
    /// `change-sha1-<first 8 hex digits>`.
    ///
    /// The ID is a pure function of the module reference, module version,
    /// resolved values, and manifest digest; the timestamp is deliberately
    /// excluded so an idempotent re-apply reuses the existing ID.
    pub fn id(&self) -> String {
        let mut hash = Sha1::new();
        hash.update(self.module.as_bytes());
        hash.update(self.module_version.as_bytes());
        hash.update(self.values.as_bytes());
        hash.update(self.digest.as_bytes());
        let hx = hex::encode(hash.finalize());
        format!("change-sha1-{}", &hx[..8])
    }
}

/// Inventory is the full per-release record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Inventory {
    /// Release identity.
    pub release: ReleaseMetadata,
    /// Module identity.
    pub module: ModuleMetadata,
    /// Index is the change-ID list, newest first, without duplicates.
    pub index: Vec<String>,
    /// Changes maps change IDs to their entries.
    pub changes: BTreeMap<String, ChangeEntry>,
    /// ResourceVersion is the opaque concurrency token from the last read;
    /// `None` before the first write.
    pub resource_version: Option<String>,
}

// Body shape of the "metadata" key, carrying the schema header.
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataBody {
    api_version: String,
    kind: String,
    release: ReleaseMetadata,
    module: ModuleMetadata,
}

impl Inventory {
    /// New creates an empty inventory for a release.
    pub fn new(module: ModuleMetadata, release: ReleaseMetadata) -> Inventory {
        Inventory {
            release,
            module,
            ..Default::default()
        }
    }

    /// Secret_name reports the well-known name of a release's inventory
    /// Secret, `opm.<releaseName>.<releaseUUID>`.
    pub fn secret_name(release: &ReleaseMetadata) -> String {
        format!("opm.{}.{}", release.name, release.uuid)
    }

    /// Entries reports the tracked resources of the newest change, or an
    /// empty slice for a fresh inventory.
    pub fn entries(&self) -> &[InventoryEntry] {
        self.index
            .first()
            .and_then(|id| self.changes.get(id))
            .map(|c| c.entries.as_slice())
            .unwrap_or_default()
    }

    /// Record adds a change to the front of the index.
    ///
    /// An already-known change ID moves to the front instead of duplicating,
    /// and its stored entry is replaced (the timestamp advances). The index
    /// tail is pruned to `limit` and the corresponding change entries are
    /// dropped in lockstep.
    pub fn record(&mut self, change: ChangeEntry, limit: usize) -> String {
        let id = change.id();
        self.index.retain(|x| x != &id);
        self.index.insert(0, id.clone());
        self.changes.insert(id.clone(), change);
        while self.index.len() > limit {
            if let Some(dropped) = self.index.pop() {
                self.changes.remove(&dropped);
            }
        }
        id
    }

    /// Marshal serializes the inventory into its Secret representation.
    ///
    /// Body keys: `metadata` (identity plus schema header), `index` (the
    /// change-ID array), and one key per change ID.
    pub fn marshal(&self) -> Result<Secret> {
        let mut data = BTreeMap::new();
        let meta = MetadataBody {
            api_version: HEADER_API_VERSION.into(),
            kind: HEADER_KIND.into(),
            release: self.release.clone(),
            module: self.module.clone(),
        };
        data.insert("metadata".to_string(), ByteString(serde_json::to_vec(&meta)?));
        data.insert("index".to_string(), ByteString(serde_json::to_vec(&self.index)?));
        for (id, change) in &self.changes {
            data.insert(id.clone(), ByteString(serde_json::to_vec(change)?));
        }

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(Self::secret_name(&self.release)),
                namespace: Some(self.release.namespace.clone()),
                labels: Some(inventory_labels(&self.module, &self.release)),
                resource_version: self.resource_version.clone(),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        })
    }

    /// Unmarshal reads an inventory back out of its Secret representation,
    /// preserving the resource-version token for optimistic concurrency.
    pub fn unmarshal(secret: &Secret) -> Result<Inventory> {
        let data = secret.data.as_ref().cloned().unwrap_or_default();
        let get = |key: &str| -> Result<&ByteString> {
            data.get(key).ok_or_else(|| Error::MissingKey(key.into()))
        };

        let meta: MetadataBody = serde_json::from_slice(&get("metadata")?.0)?;
        if meta.api_version != HEADER_API_VERSION || meta.kind != HEADER_KIND {
            return Err(Error::Header(format!("{}/{}", meta.api_version, meta.kind)));
        }
        let index: Vec<String> = serde_json::from_slice(&get("index")?.0)?;
        let mut changes = BTreeMap::new();
        for id in &index {
            let raw = data
                .get(id)
                .ok_or_else(|| Error::DanglingChange(id.clone()))?;
            changes.insert(id.clone(), serde_json::from_slice(&raw.0)?);
        }

        Ok(Inventory {
            release: meta.release,
            module: meta.module,
            index,
            changes,
            resource_version: secret.metadata.resource_version.clone(),
        })
    }
}

/// Stale_entries reports the previous entries with no identity-equal
/// counterpart in the current set.
pub fn stale_entries(
    previous: &[InventoryEntry],
    current: &[InventoryEntry],
) -> Vec<InventoryEntry> {
    previous
        .iter()
        .filter(|e| !current.iter().any(|c| c.identity() == e.identity()))
        .cloned()
        .collect()
}

/// Filter_renames drops stale entries whose Kubernetes identity survives in
/// the current set under a different component. Those represent component
/// renames and must not be deleted.
pub fn filter_renames(
    stale: Vec<InventoryEntry>,
    current: &[InventoryEntry],
) -> Vec<InventoryEntry> {
    stale
        .into_iter()
        .filter(|e| {
            !current
                .iter()
                .any(|c| c.kubernetes_identity() == e.kubernetes_identity())
        })
        .collect()
}
