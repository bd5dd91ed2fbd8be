//! Object version bookkeeping

use crate::crd::SecretProviderClassObject;
use crate::provider::ObjectVersions;

/// Versions recorded in a pod status, keyed by trimmed object ID
pub fn from_objects(objects: &[SecretProviderClassObject]) -> ObjectVersions {
    objects
        .iter()
        .map(|o| (o.id.trim().to_string(), o.version.trim().to_string()))
        .collect()
}

/// Status records for the versions a provider reported
pub fn to_objects(versions: &ObjectVersions) -> Vec<SecretProviderClassObject> {
    normalize(versions)
        .into_iter()
        .map(|(id, version)| SecretProviderClassObject { id, version })
        .collect()
}

/// Whether the provider's versions differ from the recorded ones
///
/// Both maps are compared as sets of trimmed `(id, version)` pairs, so a
/// changed version, a new object and a removed object all count.
pub fn requires_update(old: &ObjectVersions, new: &ObjectVersions) -> bool {
    normalize(old) != normalize(new)
}

fn normalize(versions: &ObjectVersions) -> ObjectVersions {
    versions
        .iter()
        .map(|(id, version)| (id.trim().to_string(), version.trim().to_string()))
        .collect()
}
