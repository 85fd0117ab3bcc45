//! Labels correlating pods and claims with the `MyStatefulSet` owning them.
use std::collections::BTreeMap;

/// Label carrying the name of the owning `MyStatefulSet`.
pub const OWNER_LABEL: &str = "mystatefulset-name";

/// The labels every owned object carries and is listed by.
pub fn owner_selector(owner: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(OWNER_LABEL.to_owned(), owner.to_owned())])
}

/// Merges the template labels with the owner label.
///
/// The owner label wins if the template happens to set it, otherwise the
/// object would not be found again when listing by owner.
pub fn with_owner(
    template_labels: Option<&BTreeMap<String, String>>,
    owner: &str,
) -> BTreeMap<String, String> {
    let mut labels = template_labels.cloned().unwrap_or_default();
    labels.extend(owner_selector(owner));
    labels
}

/// Renders `labels` as an equality-based label selector (`a=b,c=d`).
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Returns `true` if `labels` contains every entry of `selector`.
pub fn matches(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|labels| labels.get(key))
            .is_some_and(|actual| actual == value)
    })
}
